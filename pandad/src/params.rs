//! The persistent parameter store this daemon reads handshake and
//! configuration state from, modeled behind a trait; the real store's
//! persistence and cross-process fan-out are external to this crate.

use std::collections::HashMap;
use std::sync::RwLock;

use gateway_api::SafetyConfig;

/// The decoded form of the `CarParams` key. The actual on-wire encoding is
/// external to this crate; callers observe only this already-decoded shape.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CarParams {
    pub safety_configs: Vec<SafetyConfig>,
    pub alternative_experience: u16,
}

pub trait ParamStore: Send + Sync {
    fn get_bool(&self, key: &str) -> bool;
    fn put_bool(&self, key: &str, value: bool);
    fn get_car_params(&self) -> Option<CarParams>;
}

/// An in-memory parameter store for tests. Booleans default to `false` when
/// never written, matching the real store's documented default.
#[derive(Default)]
pub struct FakeParamStore {
    bools: RwLock<HashMap<String, bool>>,
    car_params: RwLock<Option<CarParams>>,
}

impl FakeParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_car_params(&self, params: CarParams) {
        *self.car_params.write().unwrap() = Some(params);
    }
}

impl ParamStore for FakeParamStore {
    fn get_bool(&self, key: &str) -> bool {
        *self.bools.read().unwrap().get(key).unwrap_or(&false)
    }

    fn put_bool(&self, key: &str, value: bool) {
        self.bools.write().unwrap().insert(key.to_string(), value);
    }

    fn get_car_params(&self) -> Option<CarParams> {
        self.car_params.read().unwrap().clone()
    }
}

pub mod key {
    pub const OBD_MULTIPLEXING_ENABLED: &str = "ObdMultiplexingEnabled";
    pub const OBD_MULTIPLEXING_CHANGED: &str = "ObdMultiplexingChanged";
    pub const FIRMWARE_QUERY_DONE: &str = "FirmwareQueryDone";
    pub const CONTROLS_READY: &str = "ControlsReady";
    pub const IS_ONROAD: &str = "IsOnroad";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_bool_defaults_false() {
        let store = FakeParamStore::new();
        assert!(!store.get_bool(key::IS_ONROAD));
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = FakeParamStore::new();
        store.put_bool(key::IS_ONROAD, true);
        assert!(store.get_bool(key::IS_ONROAD));
    }

    #[test]
    fn car_params_absent_until_set() {
        let store = FakeParamStore::new();
        assert!(store.get_car_params().is_none());
        store.set_car_params(CarParams { safety_configs: vec![], alternative_experience: 4 });
        assert_eq!(store.get_car_params().unwrap().alternative_experience, 4);
    }
}

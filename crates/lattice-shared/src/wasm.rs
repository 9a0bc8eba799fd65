//! Signaling against a JS `SharedArrayBuffer` flag table.
//!
//! Non-Rust contexts own the buffer in browser deployments; this view lets
//! Rust/WASM code participate in the same flag protocol through `Atomics`.
//! The `Int32Array` over the table is created once and cached so hot-path
//! signaling does not allocate JS objects.

use js_sys::{Atomics, Int32Array, SharedArrayBuffer};
use wasm_bindgen::JsValue;

use lattice_layout::FLAG_COUNT;

pub struct SharedFlagView {
    view: JsValue,
}

impl SharedFlagView {
    pub fn new(sab: &SharedArrayBuffer) -> SharedFlagView {
        let buffer: JsValue = sab.clone().into();
        let view: JsValue =
            Int32Array::new_with_byte_offset_and_length(&buffer, 0, FLAG_COUNT as u32).into();
        SharedFlagView { view }
    }

    pub fn load(&self, index: usize) -> Result<i32, JsValue> {
        Atomics::load(&self.view, index as u32)
    }

    pub fn store(&self, index: usize, value: i32) -> Result<i32, JsValue> {
        Atomics::store(&self.view, index as u32, value)
    }

    pub fn add(&self, index: usize, delta: i32) -> Result<i32, JsValue> {
        Atomics::add(&self.view, index as u32, delta)
    }

    /// Wake waiters parked on the flag through `Atomics.wait` in other
    /// contexts.
    pub fn notify(&self, index: usize) -> Result<u32, JsValue> {
        Atomics::notify(&self.view, index as u32)
    }

    /// Blocking wait; only legal in contexts the host allows to block
    /// (dedicated workers). Main-thread-like contexts must poll instead.
    pub fn wait_with_timeout(
        &self,
        index: usize,
        expected: i32,
        timeout_ms: f64,
    ) -> Result<JsValue, JsValue> {
        Atomics::wait_with_timeout(&self.view, index as u32, expected, timeout_ms)
            .map(JsValue::from)
    }
}

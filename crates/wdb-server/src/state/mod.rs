//! Process-wide shared state: connection registries, the breakpoint store
//! and the live settings object. Everything here is in-memory; nothing
//! survives a restart.

mod breakpoints;
mod registry;
mod settings;

pub use breakpoints::BreakpointStore;
pub use registry::{
    ConnectionHandle, ControlRegistry, DebuggeeRegistry, TcpHandle, UiRegistry, WsHandle,
    WsPayload,
};
pub use settings::Settings;

use std::sync::Arc;

/// All shared state, created once at startup and cloned into every task.
#[derive(Clone)]
pub struct Hub {
    pub sockets: Arc<DebuggeeRegistry>,
    pub websockets: Arc<UiRegistry>,
    pub control: Arc<ControlRegistry>,
    pub breakpoints: Arc<BreakpointStore>,
    pub settings: Arc<Settings>,
}

impl Hub {
    pub fn new(settings: Arc<Settings>) -> Self {
        let control = ControlRegistry::new();
        let sockets = Arc::new(DebuggeeRegistry::new(&control, settings.clone()));
        let websockets = Arc::new(UiRegistry::new(&control));
        let breakpoints = Arc::new(BreakpointStore::new(control.clone()));
        Self {
            sockets,
            websockets,
            control,
            breakpoints,
            settings,
        }
    }
}

mod dispatcher;

pub use dispatcher::{BroadcastDispatcher, DeliveryResult, DispatcherStatsSnapshot};

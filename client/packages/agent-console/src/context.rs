use crate::broker::ConnectionBroker;
use crate::connection::Connector;
use crate::endpoint::StreamEndpoint;
use crate::run_status::RunStatusRegistry;

/// Connection and run status state shared by every session view.
pub struct ConsoleContext<K: Connector> {
    pub broker: ConnectionBroker<K>,
    pub statuses: RunStatusRegistry,
}

impl<K: Connector> ConsoleContext<K> {
    pub fn new(connector: K, endpoint: StreamEndpoint) -> Self {
        Self {
            broker: ConnectionBroker::new(connector, endpoint),
            statuses: RunStatusRegistry::new(),
        }
    }
}

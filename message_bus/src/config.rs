/// Default name of the worker thread running fan-out tasks.
pub const DEFAULT_DISPATCHER_NAME: &str = "bus-dispatch";
/// Default name of the worker thread running drain tasks, when it is a separate one.
pub const DEFAULT_HANDLER_NAME: &str = "bus-handler";

/// How a [`MessageBus`](crate::MessageBus) sets up its runners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub dispatcher_name: String,
    pub handler_name: String,
    /// When false (the default), fan-out tasks and listener drain tasks share one runner.
    /// When true, drain tasks get a runner of their own, so handling overlaps with fan-out.
    pub dedicated_handler_runner: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dispatcher_name: DEFAULT_DISPATCHER_NAME.to_string(),
            handler_name: DEFAULT_HANDLER_NAME.to_string(),
            dedicated_handler_runner: false,
        }
    }
}

impl BusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatcher_name(mut self, name: impl Into<String>) -> Self {
        self.dispatcher_name = name.into();
        self
    }

    pub fn with_handler_name(mut self, name: impl Into<String>) -> Self {
        self.handler_name = name.into();
        self
    }

    pub fn with_dedicated_handler_runner(mut self, dedicated: bool) -> Self {
        self.dedicated_handler_runner = dedicated;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BusConfig::default();
        assert_eq!(config.dispatcher_name, DEFAULT_DISPATCHER_NAME);
        assert_eq!(config.handler_name, DEFAULT_HANDLER_NAME);
        assert!(!config.dedicated_handler_runner);
    }

    #[test]
    fn test_builder_setters() {
        let config = BusConfig::new()
            .with_dispatcher_name("fan-out")
            .with_handler_name("drains")
            .with_dedicated_handler_runner(true);
        assert_eq!(config.dispatcher_name, "fan-out");
        assert_eq!(config.handler_name, "drains");
        assert!(config.dedicated_handler_runner);
    }
}

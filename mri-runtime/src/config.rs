/// Platform names the engine matches against when classifying calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerConfig {
    /// Target name of the managed-code host bridge frame.
    pub bridge_target: String,
    /// Method prefix of the bridge's low-level dispatch entry.
    pub bridge_method_prefix: String,
    /// Standard entry-point method of managed programs.
    pub entry_point: String,
    /// Unit-name prefix that identifies the trigger dispatcher.
    pub dispatcher_prefix: String,
    /// Command prefix the dispatcher uses to run a script trigger.
    pub script_trigger_prefix: String,
    /// Whether profiling is on as soon as the engine is built.
    pub start_active: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            bridge_target: "matrix.db.JPOSupport".to_owned(),
            bridge_method_prefix: "invokeObject".to_owned(),
            entry_point: "mxMain".to_owned(),
            dispatcher_prefix: "emxTriggerManager".to_owned(),
            script_trigger_prefix: "execute program emxTriggerWrapper.tcl ".to_owned(),
            start_active: false,
        }
    }
}

impl ProfilerConfig {
    /// Defaults, overridden by `MRI_ACTIVE` and `MRI_ENTRY_POINT` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(active) = lookup("MRI_ACTIVE") {
            config.start_active = matches!(
                active.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        if let Some(entry) = lookup("MRI_ENTRY_POINT") {
            let entry = entry.trim();
            if !entry.is_empty() {
                config.entry_point = entry.to_owned();
            }
        }
        config
    }
}

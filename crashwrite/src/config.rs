//! Settings for a report, fixed before the crash handler runs.

/// What the introspector is allowed to look at.
#[derive(Clone, Debug)]
pub struct IntrospectionRules {
    /// Whether notable addresses are described at all.
    pub enabled: bool,
    /// Classes whose instance variables must never appear in a report.
    pub restricted_classes: Vec<String>,
}

impl Default for IntrospectionRules {
    fn default() -> Self {
        IntrospectionRules {
            enabled: true,
            restricted_classes: Vec::new(),
        }
    }
}

impl IntrospectionRules {
    pub fn is_restricted(&self, class_name: &str) -> bool {
        self.restricted_classes.iter().any(|c| c == class_name)
    }
}

/// Everything about a report that does not come from the fault itself.
#[derive(Clone, Debug, Default)]
pub struct ReportConfig {
    /// Identifies the report, written as `report.id`.
    pub report_id: String,
    pub process_name: String,
    /// Pre-serialized JSON object the `system` section starts with.
    pub system_info_json: Option<String>,
    /// Pre-serialized JSON object the `user` section starts with.
    pub user_info_json: Option<String>,
    pub introspection: IntrospectionRules,
    /// Look up and record thread names.
    pub search_thread_names: bool,
    /// Look up and record dispatch queue names.
    pub search_queue_names: bool,
}

/// Usage statistics kept across launches by the embedding application.
///
/// Written verbatim to `system.application_stats`. Durations are in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AppState {
    pub application_active: bool,
    pub application_in_foreground: bool,
    pub launches_since_last_crash: i64,
    pub sessions_since_last_crash: i64,
    pub active_duration_since_last_crash: f64,
    pub background_duration_since_last_crash: f64,
    pub sessions_since_launch: i64,
    pub active_duration_since_launch: f64,
    pub background_duration_since_launch: f64,
}

use serde::{Deserialize, Serialize};

// Wire format is camelCase end to end: the cloud snapshot store and the
// spreadsheet functions both consume the same JSON shapes.

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub category: String,
    pub color: String,
    pub is_active: bool,
    pub allow_reminder: bool,
    pub include_in_dashboard: bool,
    pub order: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecord {
    pub id: String,
    /// ISO date, `YYYY-MM-DD`.
    pub date: String,
    pub task_id: String,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// ISO datetime of the last local write.
    pub last_modified: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalMode {
    Total,
    Daily,
    Weighted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub task_id: String,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub target_count: i64,
    pub mode: GoalMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekend_multiplier: Option<f64>,
    pub created_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Peaceful,
    Joyful,
    Tired,
    Grateful,
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Photo,
    Audio,
    Link,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub date: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<Mood>,
    pub tags: Vec<String>,
    pub pin: bool,
    pub attachments: Vec<Attachment>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetKind {
    WeeklyProgress,
    MonthlyHeatmap,
    GoalTracking,
    TopTasks,
    Streak,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    pub title: String,
    pub task_ids: Vec<String>,
    pub options: serde_json::Value,
    pub order: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateField {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub required: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalTemplate {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<TemplateField>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Auto,
    Light,
    Dark,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStyle {
    Comfortable,
    Compact,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppearanceSettings {
    pub theme: Theme,
    pub accent_color: String,
    pub card_style: CardStyle,
    pub font_scale: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReminderChannel {
    WebPush,
    Email,
    Line,
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRule {
    pub id: String,
    pub label: String,
    /// `HH:mm` local time.
    pub time: String,
    pub enabled: bool,
    pub only_when_incomplete: bool,
    /// 0 (Sun) - 6 (Sat).
    pub quiet_days: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_message: Option<String>,
    pub channel: ReminderChannel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSettings {
    pub enabled: bool,
    pub timezone: String,
    pub rules: Vec<ReminderRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_notification_date: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRange {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "30d")]
    Days30,
    #[serde(rename = "90d")]
    Days90,
    #[serde(rename = "365d")]
    Days365,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
    SingleSheet,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    pub enable_sync: bool,
    pub include_journal: bool,
    pub range: SyncRange,
    pub strategy: SyncStrategy,
    /// Spreadsheet title template, `{date}` is substituted at export time.
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub const SETTINGS_ID: &str = "app-settings";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub id: String,
    pub appearance: AppearanceSettings,
    pub reminder: ReminderSettings,
    pub sync: SyncSettings,
    pub onboarding_completed: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: SETTINGS_ID.to_string(),
            appearance: AppearanceSettings {
                theme: Theme::Auto,
                accent_color: "#a855f7".to_string(),
                card_style: CardStyle::Comfortable,
                font_scale: 1.0,
            },
            reminder: ReminderSettings {
                enabled: false,
                timezone: "UTC".to_string(),
                rules: Vec::new(),
                push_endpoint: None,
                last_notification_date: None,
            },
            sync: SyncSettings {
                enable_sync: false,
                include_journal: false,
                range: SyncRange::Days90,
                strategy: SyncStrategy::SingleSheet,
                template: "Practice-{date}".to_string(),
                last_synced_at: None,
                last_error: None,
            },
            onboarding_completed: false,
        }
    }
}

pub const SNAPSHOT_VERSION: i64 = 1;

/// The full aggregate exchanged with the cloud store. Always a total
/// replacement at the wire level, never a diff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub records: Vec<DailyRecord>,
    pub goals: Vec<Goal>,
    pub journal_entries: Vec<JournalEntry>,
    pub widgets: Vec<Widget>,
    pub journal_templates: Vec<JournalTemplate>,
    pub categories: Vec<Category>,
    pub settings: Option<Settings>,
    pub version: i64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            records: Vec::new(),
            goals: Vec::new(),
            journal_entries: Vec::new(),
            widgets: Vec::new(),
            journal_templates: Vec::new(),
            categories: Vec::new(),
            settings: None,
            version: SNAPSHOT_VERSION,
        }
    }
}

/// One logged mutation bound for the cloud snapshot store. The payload is a
/// complete entity, an array of entities, or a deletion key; the log is a
/// sequence, so duplicate upserts for one id are legal and the last wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub op_type: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// One logged mutation bound for every linked spreadsheet whose tracked task
/// ids intersect it. Destination resolution happens at flush time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// A linked spreadsheet destination and the task ids it tracks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetConfig {
    pub id: String,
    pub title: String,
    pub spreadsheet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    pub task_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Storage key and merge de-duplication key for daily records.
pub fn record_key(task_id: &str, date: &str) -> String {
    format!("{task_id}-{date}")
}

pub fn create_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

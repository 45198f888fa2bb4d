use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AnalyticsParams {
    #[serde(default)]
    pub(crate) classroom_id: Option<String>,
    #[serde(default)]
    pub(crate) subject: Option<String>,
}

impl AnalyticsParams {
    fn clean(value: Option<String>) -> Option<String> {
        value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
    }

    pub(crate) fn classroom_id(&self) -> Option<String> {
        Self::clean(self.classroom_id.clone())
    }

    pub(crate) fn subject(&self) -> Option<String> {
        Self::clean(self.subject.clone())
    }
}

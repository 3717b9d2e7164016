use crate::inference::TimeWindow;

pub const CACHE_KEY_PREFIX: &str = "ims_genai_cache";
pub const NO_SYSTEM_INSTRUCTION: &str = "no_system_instruction";

/// System instruction sent with a cache, kept as the provider's text parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInstruction {
    parts: Vec<String>,
}

impl SystemInstruction {
    pub fn none() -> Self {
        Self::default()
    }

    /// Empty text counts as no instruction.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            Self::none()
        } else {
            Self { parts: vec![text] }
        }
    }

    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn text(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.parts.concat())
    }

    /// CRC-32 (IEEE) of the concatenated parts in lower-case hex, or the
    /// `no_system_instruction` sentinel.
    pub fn fingerprint(&self) -> String {
        match self.text() {
            Some(text) => format!("{:x}", crc32fast::hash(text.as_bytes())),
            None => NO_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

pub fn cache_key(model: &str, fingerprint: &str, window: Option<TimeWindow>) -> String {
    match window {
        Some(window) => format!(
            "{CACHE_KEY_PREFIX}_{model}_{fingerprint}_{}_{}",
            window.start_secs, window.end_secs
        ),
        None => format!("{CACHE_KEY_PREFIX}_{model}_{fingerprint}"),
    }
}

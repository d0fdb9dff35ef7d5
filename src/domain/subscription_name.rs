use unicode_segmentation::UnicodeSegmentation;

const MIN_GRAPHEMES: usize = 3;
const MAX_GRAPHEMES: usize = 100;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionName(String);

impl SubscriptionName {
    /// Trims surrounding whitespace, then enforces length and character rules.
    pub fn parse(s: String) -> Result<SubscriptionName, String> {
        let trimmed = s.trim();
        let length = trimmed.graphemes(true).count();
        let forbidden_characters = ['/', '(', ')', '"', '<', '>', '\\', '{', '}'];
        let contains_forbidden_characters = trimmed.chars().any(|g| forbidden_characters.contains(&g));

        if length < MIN_GRAPHEMES {
            Err(format!(
                "A subscription name needs at least {} characters, got '{}'.",
                MIN_GRAPHEMES, trimmed
            ))
        } else if length > MAX_GRAPHEMES {
            Err(format!(
                "A subscription name can have at most {} characters.",
                MAX_GRAPHEMES
            ))
        } else if contains_forbidden_characters {
            Err(format!("{} is not a valid subscription name.", trimmed))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }
}

impl AsRef<str> for SubscriptionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubscriptionName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SubscriptionName> for String {
    fn from(name: SubscriptionName) -> Self {
        name.0
    }
}

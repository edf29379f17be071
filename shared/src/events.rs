use serde::{Deserialize, Serialize};

/// Raw signal from the map viewport provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewportSignal {
    /// Pan, zoom or drag tick; the current bounds are read from the provider.
    Moved,
    /// Pointer down, drag start or zoom start.
    InteractionStart,
    /// Pointer up or drag end.
    InteractionEnd,
}

/// Transient message for the user, broadcast to every UI surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notice {
    /// Fetch protection opened; updates pause for the cooldown.
    ProtectionEngaged { cooldown_secs: u64 },
    /// A fetch failed and cached (possibly stale) results are shown.
    UsingCachedData { count: usize },
    /// A fetch failed and nothing is cached for the area.
    NothingAvailable,
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Notice::ProtectionEngaged { cooldown_secs } => {
                format!("Too many updates, pausing {cooldown_secs}s")
            }
            Notice::UsingCachedData { count } => {
                format!("Connection problem, showing {count} cached places")
            }
            Notice::NothingAvailable => "No places available for this area".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Notice, ViewportSignal};

    #[test]
    fn notices_serialize_with_type_tag() {
        let json = serde_json::to_value(Notice::ProtectionEngaged { cooldown_secs: 30 })
            .expect("notice should serialize");
        assert_eq!(
            json,
            serde_json::json!({"type": "ProtectionEngaged", "cooldown_secs": 30})
        );
        let signal: ViewportSignal =
            serde_json::from_str(r#"{"type":"InteractionEnd"}"#).expect("signal should parse");
        assert_eq!(signal, ViewportSignal::InteractionEnd);
    }

    #[test]
    fn protection_message_names_cooldown() {
        assert_eq!(
            Notice::ProtectionEngaged { cooldown_secs: 30 }.message(),
            "Too many updates, pausing 30s"
        );
    }
}

//! ---
//! vend_section: "02-messaging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Machine-scoped MQTT topic encoding and decoding."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
//! Topics have the shape `<namespace>/<machine-id>/<suffix...>`. The segment
//! at index 1 is the decimal machine id; the codec never substitutes a
//! default when it is missing or malformed.

use crate::TopicError;

/// Segment delimiter used by MQTT topics.
pub const DELIMITER: char = '/';

/// A topic split into its addressing parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTopic<'a> {
    /// First segment.
    pub namespace: &'a str,
    /// Machine the topic addresses.
    pub machine_id: u32,
    /// Everything after the machine id, without the leading delimiter.
    pub suffix: &'a str,
}

/// Split `topic` into namespace, machine id and suffix.
pub fn decode(topic: &str) -> Result<DecodedTopic<'_>, TopicError> {
    let mut parts = topic.splitn(3, DELIMITER);
    let namespace = parts.next().unwrap_or_default();
    let Some(segment) = parts.next() else {
        return Err(TopicError::InvalidTopicFormat {
            topic: topic.to_owned(),
        });
    };
    let machine_id = parse_machine_id(topic, segment)?;
    Ok(DecodedTopic {
        namespace,
        machine_id,
        suffix: parts.next().unwrap_or_default(),
    })
}

/// Extract the machine id from segment 1 of `topic`.
pub fn decode_machine_id(topic: &str) -> Result<u32, TopicError> {
    decode(topic).map(|decoded| decoded.machine_id)
}

/// Build `<root>/<machine-id>/<suffix>`; an empty suffix yields `<root>/<machine-id>`.
pub fn encode_topic(root: &str, machine_id: u32, suffix: &str) -> String {
    let suffix = suffix.trim_start_matches(DELIMITER);
    if suffix.is_empty() {
        format!("{root}{DELIMITER}{machine_id}")
    } else {
        format!("{root}{DELIMITER}{machine_id}{DELIMITER}{suffix}")
    }
}

fn parse_machine_id(topic: &str, segment: &str) -> Result<u32, TopicError> {
    let invalid = || TopicError::InvalidMachineId {
        topic: topic.to_owned(),
        segment: segment.to_owned(),
    };
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    segment.parse::<u32>().map_err(|_| invalid())
}

/// MQTT filter matching with `+` (one level) and `#` (remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split(DELIMITER);
    let mut topic_levels = topic.split(DELIMITER);
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Codec bound to one topic root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCodec {
    root: String,
}

impl TopicCodec {
    /// Create a codec for `root` (for example `vending`).
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// Topic root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Encode a machine-scoped topic under this root.
    pub fn encode(&self, machine_id: u32, suffix: &str) -> String {
        encode_topic(&self.root, machine_id, suffix)
    }

    /// Filter addressing `suffix` on one machine.
    pub fn machine_filter(&self, machine_id: u32, suffix: &str) -> String {
        self.encode(machine_id, suffix)
    }

    /// Filter addressing `suffix` on every machine.
    pub fn fleet_filter(&self, suffix: &str) -> String {
        format!("{}{DELIMITER}+{DELIMITER}{}", self.root, suffix)
    }

    /// Decode `topic`, accepting it only when it sits under this root.
    pub fn decode<'a>(&self, topic: &'a str) -> Result<DecodedTopic<'a>, TopicError> {
        let decoded = decode(topic)?;
        if decoded.namespace != self.root {
            return Err(TopicError::InvalidTopicFormat {
                topic: topic.to_owned(),
            });
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_machine_id_from_second_segment() {
        assert_eq!(decode_machine_id("vending/42/comando"), Ok(42));
        assert_eq!(decode_machine_id("vending/7"), Ok(7));
        assert_eq!(decode_machine_id("a/0/b/c/d"), Ok(0));
    }

    #[test]
    fn single_segment_is_invalid_format() {
        assert!(matches!(
            decode_machine_id("vending"),
            Err(TopicError::InvalidTopicFormat { .. })
        ));
        assert!(matches!(
            decode_machine_id(""),
            Err(TopicError::InvalidTopicFormat { .. })
        ));
    }

    #[test]
    fn non_numeric_id_is_invalid_machine_id() {
        for topic in [
            "vending/abc/comando",
            "vending//comando",
            "vending/",
            "vending/-1/comando",
            "vending/+4/comando",
            "vending/4.0/comando",
            "vending/ 4/comando",
            "vending/99999999999/comando",
        ] {
            assert!(
                matches!(decode_machine_id(topic), Err(TopicError::InvalidMachineId { .. })),
                "{topic} should be rejected"
            );
        }
    }

    #[test]
    fn leading_zeros_are_accepted() {
        assert_eq!(decode_machine_id("vending/007/status"), Ok(7));
    }

    #[test]
    fn encode_then_decode_returns_the_id() {
        for id in [0, 1, 42, 1_000, u32::MAX] {
            for suffix in ["", "status", "commands/restart", "/events/shutdown"] {
                let topic = encode_topic("vending", id, suffix);
                assert_eq!(decode_machine_id(&topic), Ok(id), "{topic}");
            }
        }
    }

    #[test]
    fn decode_exposes_suffix() {
        let decoded = decode("vending/12/commands/shutdown").unwrap();
        assert_eq!(decoded.namespace, "vending");
        assert_eq!(decoded.machine_id, 12);
        assert_eq!(decoded.suffix, "commands/shutdown");
    }

    #[test]
    fn codec_rejects_foreign_roots() {
        let codec = TopicCodec::new("vending");
        assert!(codec.decode("vending/3/status").is_ok());
        assert!(matches!(
            codec.decode("other/3/status"),
            Err(TopicError::InvalidTopicFormat { .. })
        ));
        assert_eq!(codec.fleet_filter("commands/#"), "vending/+/commands/#");
        assert_eq!(codec.machine_filter(3, "commands/+"), "vending/3/commands/+");
    }

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("vending/+/commands/#", "vending/4/commands/restart"));
        assert!(topic_matches("vending/+/commands/#", "vending/4/commands"));
        assert!(topic_matches("vending/#", "vending"));
        assert!(topic_matches("vending/4/status", "vending/4/status"));
        assert!(!topic_matches("vending/+/status", "vending/4/5/status"));
        assert!(!topic_matches("vending/+", "vending"));
        assert!(!topic_matches("vending/4/status", "vending/4/status/extra"));
        assert!(!topic_matches("vending/4", "other/4"));
    }
}

// ── Device identity and topic naming ──
//
// Pure derivations: the transport client identifier and the three
// canonical topics are computed from the identity tuple alone.
// Segment contents are never validated here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The 4-tuple naming a device within a project, location and registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub project_id: String,
    pub location: String,
    pub registry: String,
    pub device_id: String,
}

impl Identity {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        registry: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            location: location.into(),
            registry: registry.into(),
            device_id: device_id.into(),
        }
    }

    /// Transport client identifier,
    /// `projects/{P}/locations/{L}/registries/{R}/devices/{D}`.
    pub fn client_id(&self) -> String {
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.location, self.registry, self.device_id
        )
    }

    pub fn config_topic(&self) -> String {
        topic::<&str>(TopicKind::Config, self, &[])
    }

    pub fn state_topic(&self) -> String {
        topic::<&str>(TopicKind::State, self, &[])
    }

    /// Events topic, optionally extended by a hierarchy of sub-topics.
    pub fn events_topic<S: AsRef<str>>(&self, segments: &[S]) -> String {
        topic(TopicKind::Events, self, segments)
    }

    /// Name of the first empty field, if any.
    pub(crate) fn first_empty_field(&self) -> Option<&'static str> {
        [
            ("project_id", &self.project_id),
            ("location", &self.location),
            ("registry", &self.registry),
            ("device_id", &self.device_id),
        ]
        .into_iter()
        .find_map(|(name, value)| value.is_empty().then_some(name))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.client_id())
    }
}

/// The three canonical topic families of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Config,
    State,
    Events,
}

impl TopicKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::State => "state",
            Self::Events => "events",
        }
    }
}

/// Build a topic for `identity`.
///
/// `segments` only apply to [`TopicKind::Events`]; they are appended to the
/// base events topic joined with `/`. Config and state topics ignore them.
pub fn topic<S: AsRef<str>>(kind: TopicKind, identity: &Identity, segments: &[S]) -> String {
    let mut topic = format!("/devices/{}/{}", identity.device_id, kind.suffix());
    if kind == TopicKind::Events {
        for segment in segments {
            topic.push('/');
            topic.push_str(segment.as_ref());
        }
    }
    topic
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::new("p", "l", "r", "d")
    }

    #[test]
    fn client_id_follows_resource_path() {
        assert_eq!(
            identity().client_id(),
            "projects/p/locations/l/registries/r/devices/d"
        );
    }

    #[test]
    fn config_and_state_topics() {
        let id = identity();
        assert_eq!(id.config_topic(), "/devices/d/config");
        assert_eq!(id.state_topic(), "/devices/d/state");
    }

    #[test]
    fn events_topic_hierarchy() {
        let id = identity();
        assert_eq!(id.events_topic::<&str>(&[]), "/devices/d/events");
        assert_eq!(id.events_topic(&["a"]), "/devices/d/events/a");
        assert_eq!(id.events_topic(&["a", "b"]), "/devices/d/events/a/b");
    }

    #[test]
    fn segments_are_ignored_for_state() {
        assert_eq!(
            topic(TopicKind::State, &identity(), &["x"]),
            "/devices/d/state"
        );
    }

    #[test]
    fn segment_contents_are_passed_through() {
        let id = identity();
        assert_eq!(id.events_topic(&["a/b", ""]), "/devices/d/events/a/b/");
    }

    #[test]
    fn first_empty_field_reports_missing_part() {
        assert_eq!(identity().first_empty_field(), None);
        let id = Identity::new("p", "l", "", "d");
        assert_eq!(id.first_empty_field(), Some("registry"));
    }
}

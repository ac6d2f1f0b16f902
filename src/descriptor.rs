//! Parsed client descriptors
//!
//! A [`Descriptor`] is the structured form of a User-Agent string. It is
//! built once per distinct string (see [`DescriptorCache`](crate::DescriptorCache))
//! and shared read-only afterwards.
//!
//! Key expressions address descriptor attributes by name through the
//! [`Attributes`] trait, e.g. `#this.name` or `#this.operatingSystem.name`.

use std::fmt;

/// Value substituted when a version component cannot be derived.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Broad category of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AgentType {
    /// Interactive web browser
    Browser,
    /// Crawler, spider or monitoring bot
    Robot,
    /// HTTP client library or command line tool
    Library,
    /// Nothing more specific was detected
    #[default]
    Unknown,
}

impl AgentType {
    /// Display name used when the type is addressed by an expression
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "Browser",
            Self::Robot => "Robot",
            Self::Library => "Library",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system the client runs on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperatingSystem {
    /// Marketing name, e.g. `Windows 7`
    pub name: String,
    /// Family, e.g. `Windows`
    pub family: String,
    /// Raw version as reported, e.g. `6.1`
    pub version: String,
}

impl OperatingSystem {
    /// Create an operating system entry.
    pub fn new(
        name: impl Into<String>,
        family: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            family: family.into(),
            version: version.into(),
        }
    }

    /// Placeholder for clients that do not announce an operating system.
    pub fn unknown() -> Self {
        Self::new("Unknown", "Unknown", "")
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Structured result of parsing a client-identification string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Descriptor {
    /// Product name, e.g. `Chrome`
    pub name: String,
    /// Full version string, e.g. `41.0.2228.0`
    pub version: String,
    /// Product family, e.g. `Chrome` for Chromium derivatives
    pub family: String,
    /// Client category
    pub agent_type: AgentType,
    /// Operating system
    pub operating_system: OperatingSystem,
}

impl Descriptor {
    /// Create a builder.
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(name)
    }

    /// First dot-separated version component.
    ///
    /// Falls back to [`UNKNOWN_VERSION`] when the version is empty or the
    /// component is blank, so `41.0.2228.0` gives `41` and `""` gives
    /// `unknown`.
    pub fn major_version(&self) -> &str {
        version_component(&self.version, 0)
    }

    /// Second dot-separated version component, same fallback as
    /// [`major_version`](Self::major_version).
    pub fn minor_version(&self) -> &str {
        version_component(&self.version, 1)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{} {}", self.name, self.version)
        }
    }
}

fn version_component(version: &str, index: usize) -> &str {
    version
        .split('.')
        .nth(index)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .unwrap_or(UNKNOWN_VERSION)
}

/// Builder for [`Descriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    descriptor: Descriptor,
}

impl DescriptorBuilder {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            descriptor: Descriptor {
                family: name.clone(),
                name,
                operating_system: OperatingSystem::unknown(),
                ..Default::default()
            },
        }
    }

    /// Set the version string.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.descriptor.version = version.into();
        self
    }

    /// Set the product family (defaults to the name).
    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.descriptor.family = family.into();
        self
    }

    /// Set the client category.
    pub fn agent_type(mut self, agent_type: AgentType) -> Self {
        self.descriptor.agent_type = agent_type;
        self
    }

    /// Set the operating system.
    pub fn operating_system(mut self, os: OperatingSystem) -> Self {
        self.descriptor.operating_system = os;
        self
    }

    /// Build the descriptor.
    pub fn build(self) -> Descriptor {
        self.descriptor
    }
}

// ============================================================================
// Attribute access for key expressions
// ============================================================================

/// A value reached while walking an attribute path.
#[derive(Clone, Copy)]
pub enum Value<'a> {
    /// Leaf text
    Text(&'a str),
    /// Nested object that can be walked further
    Object(&'a dyn Attributes),
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Object(object) => f.write_str(&object.text()),
        }
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Object(object) => f.debug_tuple("Object").field(&object.text()).finish(),
        }
    }
}

/// Named, case-sensitive attribute lookup.
///
/// This is the closed set of things `#this.<path>` can reach.
pub trait Attributes {
    /// Look up a single attribute.
    fn attribute(&self, name: &str) -> Option<Value<'_>>;

    /// Textual form used when a path ends on this object.
    fn text(&self) -> String;
}

impl Attributes for Descriptor {
    fn attribute(&self, name: &str) -> Option<Value<'_>> {
        let value = match name {
            "name" => Value::Text(&self.name),
            "version" => Value::Text(&self.version),
            "majorVersion" => Value::Text(self.major_version()),
            "minorVersion" => Value::Text(self.minor_version()),
            "family" => Value::Text(&self.family),
            "type" => Value::Text(self.agent_type.as_str()),
            "operatingSystem" => Value::Object(&self.operating_system),
            "operatingSystemName" => Value::Text(&self.operating_system.name),
            _ => return None,
        };
        Some(value)
    }

    fn text(&self) -> String {
        self.to_string()
    }
}

impl Attributes for OperatingSystem {
    fn attribute(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "name" => Some(Value::Text(&self.name)),
            "family" => Some(Value::Text(&self.family)),
            "version" => Some(Value::Text(&self.version)),
            _ => None,
        }
    }

    fn text(&self) -> String {
        self.name.clone()
    }
}

use serde::{Deserialize, Serialize};

/// Description of one argument a service accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceArgDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl ServiceArgDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Static description of a registered processor.
///
/// Built once when the processor is registered and never mutated by request
/// processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetaData {
    pub service_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_timeout_ms: Option<i64>,
    #[serde(default)]
    pub default_priority: Option<i32>,
    #[serde(default)]
    pub args: Vec<ServiceArgDescriptor>,
}

impl ServiceMetaData {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            description: None,
            default_timeout_ms: None,
            default_priority: None,
            args: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_default_priority(mut self, priority: i32) -> Self {
        self.default_priority = Some(priority);
        self
    }

    pub fn with_arg(mut self, arg: ServiceArgDescriptor) -> Self {
        self.args.push(arg);
        self
    }
}

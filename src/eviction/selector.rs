//! Structured field selectors for pod queries
//!
//! Requirements are kept as data and only rendered to the Kubernetes
//! field-selector syntax at the API boundary, with values escaped the way
//! the apiserver expects. The same selector is evaluated locally against
//! a [`WorkloadInstance`] when classifying discovered pods.

use std::fmt;

use super::plan::WorkloadInstance;

/// Pod fields the apiserver accepts in a field selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    NodeName,
    Namespace,
    Name,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::NodeName => "spec.nodeName",
            Field::Namespace => "metadata.namespace",
            Field::Name => "metadata.name",
        }
    }

    fn value_of<'a>(&self, instance: &'a WorkloadInstance) -> &'a str {
        match self {
            Field::NodeName => &instance.node_name,
            Field::Namespace => &instance.namespace,
            Field::Name => &instance.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operator {
    Equals(String),
    NotEquals(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    field: Field,
    op: Operator,
}

impl Requirement {
    fn matches(&self, instance: &WorkloadInstance) -> bool {
        let actual = self.field.value_of(instance);
        match &self.op {
            Operator::Equals(v) => actual == v,
            Operator::NotEquals(v) => actual != v,
        }
    }
}

/// Conjunction of requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<Requirement>,
}

impl FieldSelector {
    /// Selector for every pod bound to `node`
    pub fn on_node(node: &str) -> Self {
        Self::default().equals(Field::NodeName, node)
    }

    pub fn equals(mut self, field: Field, value: &str) -> Self {
        self.requirements.push(Requirement {
            field,
            op: Operator::Equals(value.to_string()),
        });
        self
    }

    pub fn not_equals(mut self, field: Field, value: &str) -> Self {
        self.requirements.push(Requirement {
            field,
            op: Operator::NotEquals(value.to_string()),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Evaluate the selector locally
    pub fn matches(&self, instance: &WorkloadInstance) -> bool {
        self.requirements.iter().all(|r| r.matches(instance))
    }
}

/// Escape a value for use in a field selector term
fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut term = |f: &mut fmt::Formatter<'_>, field: Field, op: &str, value: &str| {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{}{}{}", field.as_str(), op, escape_value(value))
        };

        for req in &self.requirements {
            match &req.op {
                Operator::Equals(v) => term(f, req.field, "=", v)?,
                Operator::NotEquals(v) => term(f, req.field, "!=", v)?,
            }
        }
        Ok(())
    }
}

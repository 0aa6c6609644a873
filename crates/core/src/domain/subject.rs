use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::flow::ApprovalModule;
use crate::domain::UnknownKeyError;

/// The kind of domain record an approval sequence is tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    CustomerApplication,
    Inspection,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerApplication => "customer_application",
            Self::Inspection => "inspection",
        }
    }

    /// Module whose flow governs this kind of subject unless the caller picks another.
    pub fn default_module(&self) -> ApprovalModule {
        match self {
            Self::CustomerApplication => ApprovalModule::CustomerApplication,
            Self::Inspection => ApprovalModule::InspectionApproval,
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectKind {
    type Err = UnknownKeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "customer_application" => Ok(Self::CustomerApplication),
            "inspection" => Ok(Self::Inspection),
            other => Err(UnknownKeyError::new("subject kind", other)),
        }
    }
}

/// Polymorphic reference to a subject owned by the surrounding application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub kind: SubjectKind,
    pub id: i64,
}

impl SubjectRef {
    pub fn new(kind: SubjectKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn customer_application(id: i64) -> Self {
        Self::new(SubjectKind::CustomerApplication, id)
    }

    pub fn inspection(id: i64) -> Self {
        Self::new(SubjectKind::Inspection, id)
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::{SubjectKind, SubjectRef};
    use crate::domain::flow::ApprovalModule;

    #[test]
    fn subject_kind_parses_storage_keys() {
        assert_eq!("inspection".parse::<SubjectKind>(), Ok(SubjectKind::Inspection));
        assert!("invoice".parse::<SubjectKind>().is_err());
    }

    #[test]
    fn subject_ref_displays_kind_and_id() {
        assert_eq!(SubjectRef::customer_application(100).to_string(), "customer_application#100");
        assert_eq!(SubjectKind::Inspection.default_module(), ApprovalModule::InspectionApproval);
    }
}

use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::config::ConfigurationValidationError;

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load configuration file from '{path}'")]
    LoadConfiguration { path: String },
    #[error("Failed to parse configuration file '{path}'")]
    ParseConfiguration { path: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigurationValidationError),
}

/// The live target subsystem already holds objects, so provisioning from an
/// empty state is not possible.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum NotEmptyError {
    #[error("Found {count} existing backstore(s)")]
    BackstoresExist { count: usize },
    #[error("Found {count} existing target(s)")]
    TargetsExist { count: usize },
}

/// A call into the target subsystem driver failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum DriverFailureError {
    #[error("Failed to query {entity}")]
    QueryInventory { entity: String },
    #[error("Failed to load the iSCSI fabric module")]
    EnsureFabric,
    #[error("Failed to create target '{iqn}'")]
    CreateTarget { iqn: String },
    #[error("Failed to create TPG {tag} on target '{iqn}'")]
    CreateTpg { iqn: String, tag: u32 },
    #[error("Failed to create portal '{portal}' on target '{iqn}'")]
    CreatePortal { iqn: String, portal: String },
    #[error("Failed to create ACL for '{initiator}' on target '{iqn}'")]
    CreateNodeAcl { iqn: String, initiator: String },
    #[error("Failed to read TPG attribute '{attribute}' of target '{iqn}'")]
    ReadTpgAttribute { iqn: String, attribute: String },
    #[error("Failed to set TPG attribute '{attribute}' of target '{iqn}'")]
    SetTpgAttribute { iqn: String, attribute: String },
    #[error("Failed to create backstore {index}")]
    CreateBackstore { index: u32 },
    #[error("Failed to create storage object '{name}' on '{device}'")]
    CreateStorageObject { name: String, device: String },
    #[error("Failed to attach LUN '{name}' to target '{iqn}'")]
    AttachLun { iqn: String, name: String },
    #[error("Failed to map LUN '{name}' for '{initiator}' on target '{iqn}'")]
    MapLun {
        iqn: String,
        initiator: String,
        name: String,
    },
    #[error("Failed to enable TPG of target '{iqn}'")]
    EnableTpg { iqn: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum TeardownError {
    #[error("Failed to delete target '{iqn}'")]
    DeleteTarget { iqn: String },
    #[error("Failed to delete backstore {index}")]
    DeleteBackstore { index: u32 },
    #[error("Failed to delete the iSCSI fabric root")]
    DeleteFabric,
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PersistenceError {
    #[error("Failed to save the live target configuration")]
    SaveConfiguration,
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Panicked: {0}")]
    Panic(String),
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
/// The categories are intended to tell the user whether to fix the input, reset
/// the host or report a bug.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The configuration could not be loaded or is invalid.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// The target subsystem is not empty, provisioning was refused.
    #[error(transparent)]
    NotEmpty(#[from] NotEmptyError),

    /// The target subsystem driver failed while provisioning. The host may be
    /// left partially provisioned and needs a teardown before retrying.
    #[error(transparent)]
    DriverFailure(#[from] DriverFailureError),

    /// Removing objects from the target subsystem failed.
    #[error(transparent)]
    Teardown(#[from] TeardownError),

    /// The provisioned configuration could not be made persistent.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct TargetMgrErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct TargetMgrError(Box<TargetMgrErrorInner>);
impl TargetMgrError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        TargetMgrError(Box::new(TargetMgrErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn with_source(kind: impl Into<ErrorKind>, source: anyhow::Error) -> Self {
        TargetMgrError(Box::new(TargetMgrErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: Some(source),
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn internal(message: &'static str) -> Self {
        Self::new(InternalError::Internal(message))
    }

    /// Attaches an error that happened while handling this one, e.g. a failed
    /// rollback.
    #[track_caller]
    pub fn secondary_error_context(mut self, secondary: TargetMgrError) -> Self {
        self.0.context.push((format!(
            "While handling the error, an additional error was caught: \n\n{secondary:?}\n\nThe earlier error:"
        ).into(), Location::caller()));
        self
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured TargetMgrError.
    fn structured(self, kind: K) -> Result<T, TargetMgrError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, TargetMgrError> {
        match self {
            Some(t) => Ok(t),
            None => Err(TargetMgrError::new(kind)),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, TargetMgrError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(TargetMgrError::with_source(kind, e.into())),
        }
    }
}

pub trait TargetMgrResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, TargetMgrError>;
}
impl<T> TargetMgrResultExt<T> for Result<T, TargetMgrError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, TargetMgrError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

impl Serialize for TargetMgrError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("targetmgr-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::NotEmpty(ref e) => state.serialize_field("error", e)?,
            ErrorKind::DriverFailure(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Teardown(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Persistence(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for TargetMgrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (index, (context, location)) in self.0.context.iter().enumerate() {
                write_numbered(f, index, context)?;
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            for (index, cause) in source.chain().enumerate() {
                write_numbered(f, index, &cause.to_string())?;
                f.write_char('\n')?;
            }
        }
        Ok(())
    }
}

/// Writes `text` behind a right aligned index, indenting continuation lines
/// under the first one.
fn write_numbered(f: &mut std::fmt::Formatter<'_>, index: usize, text: &str) -> std::fmt::Result {
    write!(f, "{index: >5}: ")?;
    f.write_str(&text.replace('\n', "\n       "))
}

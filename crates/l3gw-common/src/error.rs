//! Error types for gateway control-plane operations.
//!
//! Every failure the reconciler, the model store or a device adapter can
//! report is a variant of [`L3Error`]. Callers that need a transport-level
//! mapping (the REST layer is external) use [`L3Error::kind`] and
//! [`ErrorKind::fault_code`] instead of matching on variant fields.

use std::io;

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for gateway operations.
pub type L3Result<T> = Result<T, L3Error>;

/// Errors that can occur while managing L3 topology.
#[derive(Debug, Error)]
pub enum L3Error {
    /// Value is neither an identifier nor a usable IPv4 CIDR.
    #[error("Invalid CIDR: '{cidr}'")]
    InvalidCidr {
        /// The rejected value.
        cidr: String,
    },

    /// Tenant already owns a subnet with this CIDR.
    #[error("Tenant {tenant_id} already has a subnet with CIDR {cidr}")]
    DuplicateCidr {
        /// Owning tenant.
        tenant_id: String,
        /// The conflicting CIDR.
        cidr: String,
    },

    /// Subnet does not exist for the tenant.
    #[error("Subnet {subnet_id} could not be found")]
    SubnetNotFound {
        /// The missing subnet.
        subnet_id: Uuid,
    },

    /// Subnet is already bound to a route table.
    #[error("Subnet {subnet_id} is already associated with route table {routetable_id}")]
    SubnetAlreadyAssociated {
        /// The subnet.
        subnet_id: Uuid,
        /// The route table it is currently bound to.
        routetable_id: Uuid,
    },

    /// Subnet is still referenced by at least one route.
    #[error("Subnet {subnet_id} is still referenced by {route_count} route(s)")]
    SubnetRouteError {
        /// The subnet.
        subnet_id: Uuid,
        /// Number of referencing routes.
        route_count: usize,
    },

    /// Route table does not exist for the tenant.
    #[error("Route table {routetable_id} could not be found")]
    RoutetableNotFound {
        /// The missing route table.
        routetable_id: Uuid,
    },

    /// Route table still owns routes and cascading is disabled.
    #[error("Route table {routetable_id} still contains {route_count} route(s)")]
    RoutetableRouteError {
        /// The route table.
        routetable_id: Uuid,
        /// Number of remaining routes.
        route_count: usize,
    },

    /// Route does not exist in the route table.
    #[error("Route {route_id} could not be found in route table {routetable_id}")]
    RouteNotFound {
        /// The route table searched.
        routetable_id: Uuid,
        /// The missing route.
        route_id: Uuid,
    },

    /// Route source is not a legal endpoint for this route table.
    #[error("Route source '{source_value}' is not valid")]
    RouteSourceInvalid {
        /// The rejected source.
        source_value: String,
    },

    /// Route destination is not a legal endpoint for this tenant.
    #[error("Route destination '{destination}' is not valid")]
    RouteDestinationInvalid {
        /// The rejected destination.
        destination: String,
    },

    /// Route target does not resolve to a known target or next hop.
    #[error("Route target '{target}' could not be found")]
    TargetNotFound {
        /// The unresolved target.
        target: String,
    },

    /// An identical route already exists in the route table.
    #[error("Route ({source_value} -> {destination} via {target}) already exists in route table {routetable_id}")]
    DuplicateRoute {
        /// The route table.
        routetable_id: Uuid,
        /// Route source.
        source_value: String,
        /// Route destination.
        destination: String,
        /// Route target.
        target: String,
    },

    /// A target with the same tag already exists.
    #[error("Target '{tag}' already exists")]
    DuplicateTarget {
        /// The conflicting tag.
        tag: String,
    },

    /// Device session could not be established.
    #[error("Unable to contact {service}: {message}")]
    ServiceContact {
        /// The device service (e.g. "zebra").
        service: String,
        /// Error message.
        message: String,
    },

    /// Device rejected a command.
    #[error("Device rejected command '{command}': {output}")]
    InvalidCommand {
        /// The rejected command.
        command: String,
        /// Device response.
        output: String,
    },

    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Filesystem error (snapshot or config I/O).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot encode/decode failure.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

/// Flat classification of [`L3Error`], used for fault-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidCidr,
    DuplicateCidr,
    SubnetNotFound,
    SubnetAlreadyAssociated,
    SubnetRouteError,
    RoutetableNotFound,
    RoutetableRouteError,
    RouteNotFound,
    RouteSourceInvalid,
    RouteDestinationInvalid,
    TargetNotFound,
    DuplicateRoute,
    DuplicateTarget,
    ServiceContact,
    InvalidCommand,
    Device,
    Config,
    Internal,
}

impl ErrorKind {
    /// Numeric fault code reported to API clients.
    pub fn fault_code(self) -> u16 {
        match self {
            ErrorKind::SubnetNotFound => 450,
            ErrorKind::InvalidCidr => 451,
            ErrorKind::DuplicateCidr => 452,
            ErrorKind::SubnetAlreadyAssociated => 453,
            ErrorKind::RoutetableNotFound => 460,
            ErrorKind::RouteNotFound => 465,
            ErrorKind::RouteSourceInvalid => 466,
            ErrorKind::RouteDestinationInvalid => 467,
            ErrorKind::TargetNotFound => 468,
            ErrorKind::SubnetRouteError | ErrorKind::RoutetableRouteError => 409,
            ErrorKind::DuplicateRoute | ErrorKind::DuplicateTarget => 409,
            ErrorKind::ServiceContact => 503,
            ErrorKind::InvalidCommand | ErrorKind::Device => 500,
            ErrorKind::Config | ErrorKind::Internal => 500,
        }
    }
}

impl L3Error {
    /// Creates an invalid CIDR error.
    pub fn invalid_cidr(cidr: impl Into<String>) -> Self {
        Self::InvalidCidr { cidr: cidr.into() }
    }

    /// Creates a subnet not found error.
    pub fn subnet_not_found(subnet_id: Uuid) -> Self {
        Self::SubnetNotFound { subnet_id }
    }

    /// Creates a route table not found error.
    pub fn routetable_not_found(routetable_id: Uuid) -> Self {
        Self::RoutetableNotFound { routetable_id }
    }

    /// Creates a route not found error.
    pub fn route_not_found(routetable_id: Uuid, route_id: Uuid) -> Self {
        Self::RouteNotFound {
            routetable_id,
            route_id,
        }
    }

    /// Creates a route source error.
    pub fn source_invalid(source: impl Into<String>) -> Self {
        Self::RouteSourceInvalid {
            source_value: source.into(),
        }
    }

    /// Creates a route destination error.
    pub fn destination_invalid(destination: impl Into<String>) -> Self {
        Self::RouteDestinationInvalid {
            destination: destination.into(),
        }
    }

    /// Creates a target not found error.
    pub fn target_not_found(target: impl Into<String>) -> Self {
        Self::TargetNotFound {
            target: target.into(),
        }
    }

    /// Creates a service contact error.
    pub fn service_contact(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceContact {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the flat kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            L3Error::InvalidCidr { .. } => ErrorKind::InvalidCidr,
            L3Error::DuplicateCidr { .. } => ErrorKind::DuplicateCidr,
            L3Error::SubnetNotFound { .. } => ErrorKind::SubnetNotFound,
            L3Error::SubnetAlreadyAssociated { .. } => ErrorKind::SubnetAlreadyAssociated,
            L3Error::SubnetRouteError { .. } => ErrorKind::SubnetRouteError,
            L3Error::RoutetableNotFound { .. } => ErrorKind::RoutetableNotFound,
            L3Error::RoutetableRouteError { .. } => ErrorKind::RoutetableRouteError,
            L3Error::RouteNotFound { .. } => ErrorKind::RouteNotFound,
            L3Error::RouteSourceInvalid { .. } => ErrorKind::RouteSourceInvalid,
            L3Error::RouteDestinationInvalid { .. } => ErrorKind::RouteDestinationInvalid,
            L3Error::TargetNotFound { .. } => ErrorKind::TargetNotFound,
            L3Error::DuplicateRoute { .. } => ErrorKind::DuplicateRoute,
            L3Error::DuplicateTarget { .. } => ErrorKind::DuplicateTarget,
            L3Error::ServiceContact { .. } => ErrorKind::ServiceContact,
            L3Error::InvalidCommand { .. } => ErrorKind::InvalidCommand,
            L3Error::ShellExec { .. } | L3Error::ShellCommandFailed { .. } => ErrorKind::Device,
            L3Error::InvalidConfig { .. } => ErrorKind::Config,
            L3Error::Io(_) | L3Error::Serialization { .. } | L3Error::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns true if the error came from a device adapter rather than
    /// from validation or the model store.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ServiceContact | ErrorKind::InvalidCommand | ErrorKind::Device
        )
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            L3Error::ServiceContact { .. } | L3Error::ShellCommandFailed { .. }
        )
    }
}

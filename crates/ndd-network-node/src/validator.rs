//! Credential and device-driver validation
//!
//! Both checks are read-only lookups plus semantic checks. `Ok(None)` means
//! the referenced object does not exist yet; the reconciler treats it like a
//! failure and retries.

use std::net::{IpAddr, Ipv6Addr};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, Secret};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use ndd_common::crd::{DeviceDriver, DriverContainerSpec};
use ndd_common::{Error, Result, DRIVER_KIND_LABEL};

/// Name of the driver container in the deployment
pub const DRIVER_CONTAINER_NAME: &str = "driver";
/// Name of the driver's gRPC container port
pub const GRPC_PORT_NAME: &str = "grpc";
/// Secret key holding the device username
pub const USERNAME_KEY: &str = "username";
/// Secret key holding the device password
pub const PASSWORD_KEY: &str = "password";

/// Resolved device credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Device username
    pub username: String,
    /// Device password
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// External facts a node depends on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Validator: Send + Sync {
    /// Resolve the credentials secret and check the target address
    async fn validate_credentials(
        &self,
        namespace: &str,
        credentials_name: &str,
        target_address: &str,
    ) -> Result<Option<Credentials>>;

    /// Resolve the catalog entry for `kind` into the driver container for
    /// node `name` listening on `port`
    async fn validate_device_driver(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        port: i32,
    ) -> Result<Option<Container>>;
}

/// [`Validator`] reading secrets and DeviceDriver catalog entries
pub struct KubeValidator {
    client: Client,
}

impl KubeValidator {
    /// Create a new validator using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Validator for KubeValidator {
    async fn validate_credentials(
        &self,
        namespace: &str,
        credentials_name: &str,
        target_address: &str,
    ) -> Result<Option<Credentials>> {
        check_target_address(target_address)?;

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match secrets.get_opt(credentials_name).await? {
            Some(secret) => credentials_from_secret(&secret).map(Some),
            None => {
                debug!(namespace, secret = credentials_name, "credentials secret not found");
                Ok(None)
            }
        }
    }

    async fn validate_device_driver(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        port: i32,
    ) -> Result<Option<Container>> {
        check_port(port)?;

        let drivers: Api<DeviceDriver> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{DRIVER_KIND_LABEL}={kind}"));
        let entries = drivers.list(&params).await?.items;

        Ok(select_driver(&entries, kind)
            .map(|dd| driver_container(&dd.spec.container, name, namespace, port)))
    }
}

/// Check that `address` is `host` or `host:port`
///
/// Hosts are DNS names or IP addresses; IPv6 with a port must be bracketed.
pub fn check_target_address(address: &str) -> Result<()> {
    let invalid = |msg: String| Error::invalid_field("spec.target.address", msg);

    let address = address.trim();
    if address.is_empty() {
        return Err(invalid("target address is empty".to_string()));
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated '[' in target address".to_string()))?;
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(invalid(format!("'{host}' is not an IPv6 address")));
        }
        match tail {
            "" => (host, None),
            t => match t.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(invalid(format!("unexpected '{t}' after ']'"))),
            },
        }
    } else if address.matches(':').count() > 1 {
        if address.parse::<Ipv6Addr>().is_err() {
            return Err(invalid(format!("'{address}' is not a valid address")));
        }
        (address, None)
    } else {
        match address.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid("target host is empty".to_string()));
    }
    if host.parse::<IpAddr>().is_err() && !is_hostname(host) {
        return Err(invalid(format!("'{host}' is not a valid host name")));
    }
    if let Some(port) = port {
        match port.parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => return Err(invalid(format!("'{port}' is not a valid port"))),
        }
    }
    Ok(())
}

fn is_hostname(host: &str) -> bool {
    host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Extract non-empty username and password from a credentials secret
pub fn credentials_from_secret(secret: &Secret) -> Result<Credentials> {
    let name = secret.name_any();
    let read = |key: &str| -> Result<String> {
        let value = secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| String::from_utf8_lossy(&v.0).into_owned())
            .or_else(|| {
                secret
                    .string_data
                    .as_ref()
                    .and_then(|d| d.get(key))
                    .cloned()
            })
            .unwrap_or_default();
        if value.is_empty() {
            return Err(Error::invalid_field(
                "spec.target.credentialsName",
                format!("secret {name} has no {key}"),
            ));
        }
        Ok(value)
    };

    Ok(Credentials {
        username: read(USERNAME_KEY)?,
        password: read(PASSWORD_KEY)?,
    })
}

/// Check that `port` is a usable TCP port
pub fn check_port(port: i32) -> Result<()> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(Error::invalid_field(
            "spec.grpcServerPort",
            format!("port {port} is outside 1..=65535"),
        ))
    }
}

/// Pick the catalog entry serving `kind`
///
/// When several entries claim the same kind the first by name wins, so the
/// choice is stable across passes.
pub fn select_driver<'a>(entries: &'a [DeviceDriver], kind: &str) -> Option<&'a DeviceDriver> {
    let mut matching: Vec<&DeviceDriver> = entries
        .iter()
        .filter(|dd| dd.driver_kind() == Some(kind))
        .collect();
    matching.sort_by_key(|dd| dd.name_any());

    if matching.len() > 1 {
        warn!(
            kind,
            chosen = %matching[0].name_any(),
            candidates = matching.len(),
            "multiple device drivers for kind, using the first by name"
        );
    }
    matching.first().copied()
}

/// Build the driver container for one node
pub fn driver_container(
    spec: &DriverContainerSpec,
    node_name: &str,
    namespace: &str,
    port: i32,
) -> Container {
    let mut args = spec.args.clone();
    args.push(format!("--grpc-server-address=:{port}"));
    args.push(format!("--device-name={node_name}"));
    args.push(format!("--namespace={namespace}"));

    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    Container {
        name: DRIVER_CONTAINER_NAME.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: spec.image_pull_policy.clone(),
        command: (!spec.command.is_empty()).then(|| spec.command.clone()),
        args: Some(args),
        env: (!env.is_empty()).then_some(env),
        ports: Some(vec![ContainerPort {
            name: Some(GRPC_PORT_NAME.to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

//! Command-line configuration for `ndd start`

use std::time::Duration;

use clap::Args;

use ndd_common::NDD_SYSTEM_NAMESPACE;
use ndd_network_node::ControllerConfig;

/// Options for running the controllers
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct StartArgs {
    /// Namespace the driver config maps, services and deployments live in
    #[arg(long, env = "POD_NAMESPACE", default_value = NDD_SYSTEM_NAMESPACE)]
    pub namespace: String,

    /// Nodes reconciled in parallel
    #[arg(long, env = "NDD_CONCURRENCY", default_value_t = 1)]
    pub concurrency: u16,

    /// Longest retry delay for a degraded node
    #[arg(long, env = "NDD_SHORT_WAIT_SECS", default_value_t = 30)]
    pub short_wait_secs: u64,

    /// First retry delay after a failure
    #[arg(long, env = "NDD_VERY_SHORT_WAIT_SECS", default_value_t = 5)]
    pub very_short_wait_secs: u64,

    /// Budget for one reconcile pass
    #[arg(long, env = "NDD_RECONCILE_TIMEOUT_SECS", default_value_t = 60)]
    pub reconcile_timeout_secs: u64,

    /// Assume the CRDs are already installed
    #[arg(long)]
    pub skip_crd_install: bool,

    /// Human-readable logs at debug level
    #[arg(long)]
    pub debug: bool,
}

impl StartArgs {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("--namespace must not be empty");
        }
        if self.concurrency == 0 {
            anyhow::bail!("--concurrency must be at least 1");
        }
        if self.very_short_wait_secs == 0 {
            anyhow::bail!("--very-short-wait-secs must be greater than 0");
        }
        if self.very_short_wait_secs > self.short_wait_secs {
            anyhow::bail!(
                "--very-short-wait-secs ({}) must not exceed --short-wait-secs ({})",
                self.very_short_wait_secs,
                self.short_wait_secs
            );
        }
        if self.reconcile_timeout_secs == 0 {
            anyhow::bail!("--reconcile-timeout-secs must be greater than 0");
        }
        Ok(())
    }

    /// Tunables handed to the NetworkNode controller
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workload_namespace: self.namespace.clone(),
            short_wait: Duration::from_secs(self.short_wait_secs),
            very_short_wait: Duration::from_secs(self.very_short_wait_secs),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
        }
    }
}

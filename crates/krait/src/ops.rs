//! High-level operations against a prefix: plan and apply an install, update
//! or removal.
//!
//! This is the pipeline described by the component overview: the prefix
//! ledger supplies the installed records and the historic user specs, the
//! repodata gateway supplies the candidates of every configured
//! (channel, subdir) pair, the virtual packages describe the host, the
//! solver produces the desired record set, and the transaction engine
//! applies the difference.

use std::path::Path;

use krait_conda_types::{
    Channel, MatchSpec, Matches, ParseChannelError, RepoDataRecord,
};
use krait_repodata_gateway::{
    fetch::{CacheAction, FetchRepoDataOptions, RepodataTtl},
    gateway::{fetch_subdir_records, GatewayError},
};
use krait_solve::{SolveError, SolverTask, UpdateModifier};
use krait_virtual_packages::{
    DetectVirtualPackageError, VirtualPackage, VirtualPackageOverrides,
};

use crate::{
    install::{InstallResult, Installer, InstallerError, Transaction, TransactionError},
    Context, PrefixData, PrefixDataError,
};

/// What to do to a prefix.
#[derive(Debug, Default)]
pub struct PrefixUpdateRequest {
    /// The specs to install or update.
    pub specs: Vec<MatchSpec>,

    /// The specs to remove.
    pub remove_specs: Vec<MatchSpec>,

    /// How aggressively installed packages may change.
    pub update_modifier: UpdateModifier,

    /// Plan only: solve and compute the transaction but never touch the
    /// filesystem or the ledger.
    pub dry_run: bool,

    /// The description recorded in the history entry.
    pub description: Option<String>,
}

/// The outcome of [`update_prefix`].
pub enum PrefixUpdate {
    /// The transaction that would be executed (dry run).
    Planned(Transaction),

    /// The transaction was executed and committed.
    Applied(InstallResult),
}

/// An error from planning or applying a prefix update.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    #[error(transparent)]
    PrefixDataError(#[from] PrefixDataError),

    #[error("invalid channel: {0}")]
    ChannelError(#[from] ParseChannelError),

    #[error(transparent)]
    GatewayError(#[from] GatewayError),

    #[error(transparent)]
    VirtualPackageError(#[from] DetectVirtualPackageError),

    #[error(transparent)]
    SolveError(#[from] SolveError),

    #[error(transparent)]
    TransactionError(#[from] TransactionError),

    #[error(transparent)]
    InstallerError(#[from] InstallerError),
}

/// Plans (and unless `dry_run` is set, applies) an update of the given
/// prefix.
pub async fn update_prefix(
    context: &Context,
    prefix: &Path,
    request: PrefixUpdateRequest,
) -> Result<PrefixUpdate, OpsError> {
    // The ledger supplies the current state and the historic user specs.
    let prefix_data = PrefixData::from_path(prefix)?;
    prefix_data.find_inconsistencies();

    let removed_names: Vec<&str> = request
        .remove_specs
        .iter()
        .filter_map(|spec| spec.name.as_ref())
        .map(|name| name.as_normalized())
        .collect();

    let installed: Vec<RepoDataRecord> = prefix_data
        .records()
        .map(|record| record.repodata_record.clone())
        .filter(|record| !removed_names.contains(&record.package_record.name.as_normalized()))
        .collect();

    // The requested specs: the history minus the removals, plus the new
    // requests.
    let mut specs: Vec<MatchSpec> = prefix_data
        .requested_specs()?
        .into_iter()
        .filter(|spec| {
            spec.name
                .as_ref()
                .map_or(true, |name| !removed_names.contains(&name.as_normalized()))
        })
        .filter(|historic| {
            // New requests override historic requests of the same name.
            historic.name.as_ref().map_or(true, |name| {
                !request
                    .specs
                    .iter()
                    .any(|spec| spec.name.as_ref() == Some(name))
            })
        })
        .collect();
    specs.extend(request.specs.iter().cloned());

    // Pins come from the prefix and the global configuration.
    let mut pinned_specs = prefix_data.pinned_specs()?;
    pinned_specs.extend(context.pinned_packages.iter().cloned());

    let virtual_packages = VirtualPackage::detect(&VirtualPackageOverrides::from_env())?
        .into_iter()
        .map(Into::into)
        .collect();

    // Candidates per (channel, subdir), in channel priority order.
    let cache_action = if context.offline {
        CacheAction::ForceCacheOnly
    } else {
        CacheAction::CacheOrFetch
    };
    let repodata_fns = if context.repodata_fns.is_empty() {
        vec!["repodata.json".to_owned()]
    } else {
        context.repodata_fns.clone()
    };
    let client = reqwest::Client::new();
    let repodata_cache = context.primary_pkgs_dir().join("cache");
    let channel_config = context.channel_config();

    let mut available_packages = Vec::new();
    for channel_name in context.resolved_channel_names() {
        let channel = Channel::from_str(&channel_name, &channel_config)?;
        for (platform, _url) in channel.platforms_url(context.platform) {
            // One record collection per (channel, subdir). The configured
            // repodata filenames are tried in order; the first one that
            // exists wins.
            let mut records = Err(GatewayError::Cancelled);
            for repodata_fn in &repodata_fns {
                let fetch_options = FetchRepoDataOptions {
                    cache_action,
                    repodata_fn: repodata_fn.clone(),
                    local_repodata_ttl: RepodataTtl::from(context.local_repodata_ttl),
                    max_retries: context.remote_max_retries,
                    backoff_factor: context.remote_backoff_factor,
                };
                records = fetch_subdir_records(
                    &channel,
                    platform,
                    client.clone(),
                    &repodata_cache,
                    fetch_options,
                )
                .await;
                match &records {
                    Err(GatewayError::FetchError(
                        krait_repodata_gateway::fetch::FetchRepoDataError::NotFound(_),
                    )) => continue,
                    _ => break,
                }
            }

            match records {
                Ok(records) => available_packages.push(records),
                Err(GatewayError::FetchError(e)) if context.offline => {
                    // In offline mode a channel without a cache entry simply
                    // contributes nothing.
                    tracing::warn!("skipping {channel_name} while offline: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    let task = SolverTask {
        available_packages,
        installed_packages: installed,
        virtual_packages,
        specs: specs.clone(),
        pinned_specs,
        update_modifier: request.update_modifier,
        channel_priority: context.channel_priority,
        aggressive_update_packages: context.aggressive_update_names(),
    };
    let solution = krait_solve::solve(&task)?;

    let transaction = Transaction::from_current_and_desired(
        prefix_data.records().cloned().collect(),
        solution.records,
        context.platform,
    )?;

    if request.dry_run {
        return Ok(PrefixUpdate::Planned(transaction));
    }

    // Record which spec caused which package, for the ledger.
    let requested_specs = transaction
        .records_to_install_in_link_order()
        .iter()
        .filter_map(|record| {
            let spec = specs
                .iter()
                .find(|spec| spec.matches(record))?;
            Some((
                record.package_record.name.as_normalized().to_owned(),
                spec.to_string(),
            ))
        })
        .collect::<Vec<_>>();

    let installer = Installer::new(krait_cache::PackageCache::new(context.primary_pkgs_dir()))
        .with_client(client)
        .with_platform(context.platform)
        .with_safety_checks(context.safety_checks)
        .with_allow_softlinks(context.allow_softlinks)
        .with_always_copy(context.always_copy)
        .with_path_conflict(context.path_conflict)
        .with_requested_specs(requested_specs)
        .with_description(
            request
                .description
                .unwrap_or_else(|| "update".to_owned()),
        );

    let result = installer.install(prefix, transaction).await?;
    Ok(PrefixUpdate::Applied(result))
}

//! One open recording: catalogs, plan and navigation controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::catalog::{CatalogIssue, FileCatalog, ModalityId};
use crate::config::{FrequencySpec, ModalityKind, SessionConfig};
use crate::error::{Result, SyncError};
use crate::navigation::loader::ModalitySource;
use crate::navigation::{NavigationController, ReferenceAxis};
use crate::planner::{self, PlanOptions, SyncPlan};
use crate::reader::ReaderKind;

/// Cursor axis used when no modality has a regular frequency.
pub const FALLBACK_REFERENCE_FREQUENCY: f64 = 1000.0;

pub struct Session {
    pub config: SessionConfig,
    pub catalogs: Vec<FileCatalog>,
    /// Every problem found while cataloging, in modality order.
    pub issues: Vec<CatalogIssue>,
    pub plan: Arc<SyncPlan>,
    pub controller: NavigationController,
}

/// Catalogs and plan, before a controller is attached.
pub struct SessionLayout {
    pub catalogs: Vec<FileCatalog>,
    pub issues: Vec<CatalogIssue>,
    pub plan: SyncPlan,
    pub reference: ReferenceAxis,
}

impl Session {
    /// Scan, plan and start loading chunk 0.
    pub fn open(config: SessionConfig) -> Result<Self> {
        let layout = build_layout(&config)?;
        let sources = modality_sources(&config, &layout.catalogs);
        let plan = Arc::new(layout.plan);
        let controller = NavigationController::new(
            plan.clone(),
            sources,
            layout.reference,
            config.window_duration_secs,
            config.zoom_factor,
        )?;

        Ok(Self {
            config,
            catalogs: layout.catalogs,
            issues: layout.issues,
            plan,
            controller,
        })
    }

    /// Run [`Session::open`] on a worker thread.
    pub fn open_in_background(config: SessionConfig) -> PendingSession {
        let handle = thread::Builder::new()
            .name("session-open".to_string())
            .spawn(move || Session::open(config));
        PendingSession { handle }
    }

    pub fn catalog(&self, modality: &ModalityId) -> Option<&FileCatalog> {
        self.catalogs.iter().find(|c| &c.modality == modality)
    }
}

pub struct PendingSession {
    handle: std::io::Result<JoinHandle<Result<Session>>>,
}

impl PendingSession {
    pub fn is_finished(&self) -> bool {
        match &self.handle {
            Ok(handle) => handle.is_finished(),
            Err(_) => true,
        }
    }

    pub fn join(self) -> Result<Session> {
        let handle = self
            .handle
            .map_err(|e| SyncError::Io {
                path: "session-open thread".into(),
                source: e,
            })?;
        handle
            .join()
            .map_err(|_| SyncError::InvalidConfig("session opening thread panicked".to_string()))?
    }
}

/// Catalog every modality and plan the recording.
///
/// Modalities that follow the reference frequency are cataloged last. All
/// catalog issues are collected; every required modality left without files
/// is reported at once in a single [`SyncError::NoData`].
pub fn build_layout(config: &SessionConfig) -> Result<SessionLayout> {
    config.validate()?;
    let tz = config.time_zone_offset()?;

    let follows_reference = |id: &str| {
        config
            .modality(id)
            .and_then(|m| m.frequency.as_ref())
            .is_some_and(|f| matches!(f, FrequencySpec::Value(v) if *v == FrequencySpec::SAME_AS_REFERENCE))
    };

    let mut built: BTreeMap<String, FileCatalog> = BTreeMap::new();
    let mut issues: BTreeMap<String, Vec<CatalogIssue>> = BTreeMap::new();

    for modality in config.modalities.iter().filter(|m| !follows_reference(&m.id)) {
        let build = FileCatalog::build(modality, tz, None)?;
        issues.insert(modality.id.clone(), build.issues);
        built.insert(modality.id.clone(), build.catalog);
    }

    let reference = choose_reference(config, &built);
    let known = reference.modality.is_some().then_some(reference.frequency);
    for modality in config.modalities.iter().filter(|m| follows_reference(&m.id)) {
        let build = FileCatalog::build(modality, tz, known)?;
        issues.insert(modality.id.clone(), build.issues);
        built.insert(modality.id.clone(), build.catalog);
    }

    let mut catalogs = Vec::new();
    let mut all_issues = Vec::new();
    let mut missing = Vec::new();
    for modality in &config.modalities {
        all_issues.extend(issues.remove(&modality.id).unwrap_or_default());
        let Some(catalog) = built.remove(&modality.id) else {
            continue;
        };
        if catalog.is_empty() {
            if modality.required {
                missing.push(modality.id.clone());
            } else {
                tracing::warn!("[{}] no usable file, modality left out", modality.id);
                all_issues.push(CatalogIssue {
                    modality: catalog.modality.clone(),
                    path: None,
                    message: "no usable file, modality left out".to_string(),
                    excluded: true,
                });
            }
            continue;
        }
        tracing::info!(
            "[{}] {} file(s) from {} to {}",
            modality.id,
            catalog.len(),
            catalog.first_start().map(crate::timestamp::format_datetime).unwrap_or_default(),
            catalog.last_end().map(crate::timestamp::format_datetime).unwrap_or_default()
        );
        catalogs.push(catalog);
    }

    for issue in &all_issues {
        tracing::debug!("{}", issue);
    }
    if !missing.is_empty() {
        return Err(SyncError::NoData(missing));
    }

    let options = PlanOptions {
        chunk_duration: config.chunk_duration_secs,
        end_policy: config.end_policy,
        tolerance: config.tolerance_secs,
    };
    let plan = planner::plan(&catalogs, &options)?;
    tracing::info!(
        "planned {} chunk(s) of {} s, reference {} at {} Hz",
        plan.chunk_count(),
        plan.chunk_duration,
        reference.modality.as_ref().map_or("(none)", |m| m.as_str()),
        reference.frequency
    );

    Ok(SessionLayout {
        catalogs,
        issues: all_issues,
        plan,
        reference,
    })
}

/// Configured reference if it is regular, else the first regular video,
/// else the first regular modality, else a fixed millisecond axis.
fn choose_reference(config: &SessionConfig, catalogs: &BTreeMap<String, FileCatalog>) -> ReferenceAxis {
    let regular = |id: &str| catalogs.get(id).and_then(FileCatalog::frequency);

    if let Some(id) = &config.reference_modality {
        if let Some(frequency) = regular(id) {
            return ReferenceAxis {
                modality: Some(ModalityId::new(id.as_str())),
                frequency,
            };
        }
        tracing::warn!("reference modality '{}' has no regular frequency, choosing another", id);
    }

    let videos = config.modalities.iter().filter(|m| m.kind == ModalityKind::Video);
    let others = config.modalities.iter().filter(|m| m.kind != ModalityKind::Video);
    videos
        .chain(others)
        .find_map(|m| {
            regular(&m.id).map(|frequency| ReferenceAxis {
                modality: Some(ModalityId::new(m.id.as_str())),
                frequency,
            })
        })
        .unwrap_or(ReferenceAxis {
            modality: None,
            frequency: FALLBACK_REFERENCE_FREQUENCY,
        })
}

/// How the loader opens each planned modality.
pub fn modality_sources(config: &SessionConfig, catalogs: &[FileCatalog]) -> BTreeMap<ModalityId, ModalitySource> {
    catalogs
        .iter()
        .filter_map(|catalog| {
            let modality = config.modality(catalog.modality.as_str())?;
            let kind = ReaderKind::for_modality(modality);
            let channels = match kind {
                ReaderKind::VideoContainer => 1,
                _ => catalog.files.iter().map(|f| f.channels).max().unwrap_or(1).max(1),
            };
            Some((
                catalog.modality.clone(),
                ModalitySource {
                    kind,
                    key: modality.key.clone(),
                    channels,
                },
            ))
        })
        .collect()
}

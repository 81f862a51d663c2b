//! Recording difference photometry in the `iphotfiles` / `iphotobjects` tables.
//!
//! Photometry files are parsed in parallel; rows are written from a single
//! connection, one transaction per frame.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::{info, warn};

use crate::context::Context;
use crate::error::{IsmError, Result};
use crate::identity::{resolve_identity, FrameIdentity};
use crate::io::fiphot::read_photometry;
use crate::io::fits::read_header;
use crate::progress::PipelineStage;
use crate::reference::DifferenceArtifact;
use crate::registry::{path_text, Registry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted { objects: usize },
    Replaced { objects: usize },
    /// Rows already exist and overwriting was not requested.
    Conflict,
}

/// One frame's rows, parsed and ready to write.
#[derive(Clone, Debug)]
pub struct IphotRecord {
    pub artifact: DifferenceArtifact,
    pub identity: FrameIdentity,
    pub frame_jd: Option<f64>,
    /// (object id, line number)
    pub objects: Vec<(String, usize)>,
}

/// Read everything needed to ingest one artifact.
pub fn prepare_ingest(artifact: &DifferenceArtifact) -> Result<IphotRecord> {
    let identity = resolve_identity(&artifact.source_frame)?;
    let frame_jd = read_header(&artifact.subtracted_frame_path)
        .ok()
        .and_then(|h| h.get_f64("JD"));
    let objects = read_photometry(&artifact.photometry_output_path)?
        .into_iter()
        .map(|r| (r.id, r.line))
        .collect();
    Ok(IphotRecord {
        artifact: artifact.clone(),
        identity,
        frame_jd,
        objects,
    })
}

/// Write one frame's rows. Existing rows are replaced only when `overwrite` is set.
pub fn write_iphot(registry: &mut Registry, record: &IphotRecord, overwrite: bool) -> Result<IngestOutcome> {
    let a = &record.artifact;
    let frame_key = record.identity.tag();
    let kind = a.reference_type.as_str();
    let direction = a.subtraction_direction.as_str();
    let phot = path_text(&a.photometry_output_path);

    let tx = registry
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;
    let existing: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM iphotfiles WHERE framekey = ?1 AND photreftype = ?2 AND subtracttype = ?3",
            params![frame_key, kind, direction],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        if !overwrite {
            return Ok(IngestOutcome::Conflict);
        }
        tx.execute(
            "DELETE FROM iphotobjects WHERE framekey = ?1 AND photreftype = ?2 AND subtracttype = ?3",
            params![frame_key, kind, direction],
        )?;
        tx.execute(
            "DELETE FROM iphotfiles WHERE framekey = ?1 AND photreftype = ?2 AND subtracttype = ?3",
            params![frame_key, kind, direction],
        )?;
    }

    tx.execute(
        "INSERT INTO iphotfiles (projectid, field, ccd, photreftype, subtracttype, framekey,
             framepath, phot, kernel, framejd, entrytimestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.identity.project_id,
            record.identity.field,
            record.identity.ccd,
            kind,
            direction,
            frame_key,
            path_text(&a.subtracted_frame_path),
            phot,
            path_text(&a.convolution_kernel_path),
            record.frame_jd,
            Utc::now().to_rfc3339(),
        ],
    )?;
    {
        let mut insert = tx.prepare(
            "INSERT OR REPLACE INTO iphotobjects
                 (objectid, framekey, photreftype, subtracttype, phot, photline)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (object_id, line) in &record.objects {
            insert.execute(params![object_id, frame_key, kind, direction, phot, *line as i64])?;
        }
    }
    tx.commit()?;

    let objects = record.objects.len();
    Ok(if existing.is_some() {
        IngestOutcome::Replaced { objects }
    } else {
        IngestOutcome::Inserted { objects }
    })
}

/// Ingest a batch of difference artifacts. Each frame's outcome is reported separately.
pub fn ingest_artifacts(
    artifacts: Vec<DifferenceArtifact>,
    overwrite: bool,
    ctx: &Context,
) -> Result<Vec<(PathBuf, Result<IngestOutcome>)>> {
    let mut registry = ctx.registry()?;
    let prepared = ctx.pool.map_reported(
        artifacts,
        prepare_ingest,
        ctx.reporter(),
        Some(PipelineStage::Ingesting),
    );

    let mut outcomes = Vec::with_capacity(prepared.len());
    for r in prepared {
        let frame = r.task.source_frame.clone();
        let outcome = match r.outcome {
            Ok(record) => write_iphot(&mut registry, &record, overwrite),
            Err(e) => Err(IsmError::missing(
                &r.task.photometry_output_path,
                format!("unreadable photometry: {e}"),
            )),
        };
        match &outcome {
            Ok(IngestOutcome::Conflict) => {
                warn!(frame = %frame.display(), "Photometry already ingested, not overwriting")
            }
            Ok(o) => info!(frame = %frame.display(), outcome = ?o, "Ingested photometry"),
            Err(e) => warn!(frame = %frame.display(), error = %e, "Ingestion failed"),
        }
        outcomes.push((frame, outcome));
    }
    Ok(outcomes)
}

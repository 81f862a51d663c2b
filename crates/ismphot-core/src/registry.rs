//! SQLite registry of reference frames.
//!
//! Every reference kind keeps its full history; at most one row per key is
//! active. Registration deactivates the current row and inserts the new one in
//! a single immediate transaction, and a partial unique index over the key
//! columns `WHERE isactive = 1` rejects any second active row. A rejected
//! write rolls back and leaves the previous reference active.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{IsmError, Result};
use crate::identity::FrameKey;
use crate::quality::QualityMetrics;
use crate::reference::{AstrometricReference, BuildInfo, CombinedPhotometricReference, ReferenceType};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS astromrefs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    field       TEXT NOT NULL,
    projectid   INTEGER NOT NULL,
    ccd         INTEGER NOT NULL,
    isactive    INTEGER NOT NULL,
    createdat   TEXT NOT NULL,
    framepath   TEXT NOT NULL,
    jpegpath    TEXT NOT NULL,
    sval        REAL,
    dval        REAL,
    bgv         REAL,
    ndet        INTEGER,
    comment     TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS astromrefs_one_active
    ON astromrefs(field, projectid, ccd) WHERE isactive = 1;

CREATE TABLE IF NOT EXISTS photrefs (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    field               TEXT NOT NULL,
    projectid           INTEGER NOT NULL,
    ccd                 INTEGER NOT NULL,
    photreftype         TEXT NOT NULL,
    isactive            INTEGER NOT NULL,
    createdat           TEXT NOT NULL,
    framepath           TEXT NOT NULL,
    jpegpath            TEXT NOT NULL,
    convolvetarget      TEXT NOT NULL,
    convolveregpath     TEXT NOT NULL,
    cmrawphotpath       TEXT NOT NULL,
    target_zenithdist   REAL,
    target_moondist     REAL,
    target_moonelev     REAL,
    target_moonphase    REAL,
    target_hourangle    REAL,
    target_ndet         INTEGER,
    target_medmagerr    REAL,
    target_magerrmad    REAL,
    target_medsrcbgv    REAL,
    target_stdsrcbgv    REAL,
    target_medsval      REAL,
    target_meddval      REAL,
    target_nsrc         INTEGER,
    photrefinfo         TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS photrefs_one_active
    ON photrefs(field, projectid, ccd, photreftype) WHERE isactive = 1;

CREATE TABLE IF NOT EXISTS iphotfiles (
    projectid       INTEGER NOT NULL,
    field           TEXT NOT NULL,
    ccd             INTEGER NOT NULL,
    photreftype     TEXT NOT NULL,
    subtracttype    TEXT NOT NULL,
    framekey        TEXT NOT NULL,
    framepath       TEXT NOT NULL,
    phot            TEXT NOT NULL,
    kernel          TEXT,
    framejd         REAL,
    entrytimestamp  TEXT NOT NULL,
    PRIMARY KEY (framekey, photreftype, subtracttype)
);

CREATE TABLE IF NOT EXISTS iphotobjects (
    objectid        TEXT NOT NULL,
    framekey        TEXT NOT NULL,
    photreftype     TEXT NOT NULL,
    subtracttype    TEXT NOT NULL,
    phot            TEXT NOT NULL,
    photline        INTEGER NOT NULL,
    PRIMARY KEY (objectid, framekey, photreftype, subtracttype)
);
CREATE INDEX IF NOT EXISTS iphotobjects_frame
    ON iphotobjects(framekey, photreftype, subtracttype);
";

const ASTROMREF_COLUMNS: &str =
    "field, projectid, ccd, isactive, createdat, framepath, jpegpath, sval, dval, bgv, ndet, comment";

const PHOTREF_COLUMNS: &str = "field, projectid, ccd, photreftype, isactive, createdat, framepath, \
    jpegpath, convolvetarget, convolveregpath, cmrawphotpath, target_zenithdist, target_moondist, \
    target_moonelev, target_moonphase, target_hourangle, target_ndet, target_medmagerr, \
    target_magerrmad, target_medsrcbgv, target_stdsrcbgv, target_medsval, target_meddval, target_nsrc, \
    photrefinfo";

pub struct Registry {
    conn: Connection,
    path: PathBuf,
}

impl Registry {
    /// Open (creating if needed) the registry database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "Registry opened");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Make `reference` the active astrometric reference for its key.
    pub fn register_astromref(&mut self, reference: &AstrometricReference) -> Result<()> {
        let key = reference.key();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE astromrefs SET isactive = 0
             WHERE field = ?1 AND projectid = ?2 AND ccd = ?3 AND isactive = 1",
            params![key.field, key.project_id, key.ccd],
        )?;
        tx.execute(
            &format!("INSERT INTO astromrefs ({ASTROMREF_COLUMNS}) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
            params![
                key.field,
                key.project_id,
                key.ccd,
                reference.created_at.to_rfc3339(),
                path_text(&reference.frame_path),
                path_text(&reference.jpeg_path),
                reference.s_val,
                reference.d_val,
                reference.bg_val,
                reference.detection_count as i64,
                reference.comment,
            ],
        )
        .map_err(|e| conflict_or(e, &key.to_string()))?;
        tx.commit()?;
        info!(key = %key, frame = %reference.frame_path.display(), "Registered astrometric reference");
        Ok(())
    }

    pub fn get_active_astromref(&self, key: &FrameKey) -> Result<AstrometricReference> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ASTROMREF_COLUMNS} FROM astromrefs
             WHERE field = ?1 AND projectid = ?2 AND ccd = ?3 AND isactive = 1
             ORDER BY createdat DESC"
        ))?;
        let rows = stmt
            .query_map(params![key.field, key.project_id, key.ccd], astromref_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        single_active(rows, "astrometric reference", &key.to_string())
    }

    /// All astrometric references ever registered for `key`, newest first.
    pub fn astromref_history(&self, key: &FrameKey) -> Result<Vec<AstrometricReference>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ASTROMREF_COLUMNS} FROM astromrefs
             WHERE field = ?1 AND projectid = ?2 AND ccd = ?3
             ORDER BY id DESC"
        ))?;
        let rows = stmt
            .query_map(params![key.field, key.project_id, key.ccd], astromref_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Make `reference` the active combined photometric reference for its key and type.
    pub fn register_combined_ref(&mut self, reference: &CombinedPhotometricReference) -> Result<()> {
        let key = reference.key();
        let kind = reference.reference_type.as_str();
        let info = serde_json::to_string(&reference.build)?;
        let m = &reference.target_metrics;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE photrefs SET isactive = 0
             WHERE field = ?1 AND projectid = ?2 AND ccd = ?3 AND photreftype = ?4 AND isactive = 1",
            params![key.field, key.project_id, key.ccd, kind],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO photrefs ({PHOTREF_COLUMNS}) VALUES
                 (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                  ?18, ?19, ?20, ?21, ?22, ?23, ?24)"
            ),
            params![
                key.field,
                key.project_id,
                key.ccd,
                kind,
                reference.created_at.to_rfc3339(),
                path_text(&reference.frame_path),
                path_text(&reference.jpeg_path),
                path_text(&reference.convolve_target_path),
                path_text(&reference.registration_file_path),
                path_text(&reference.calibration_photometry_path),
                m.zenith_distance,
                m.moon_distance,
                m.moon_elevation,
                m.moon_phase,
                m.hour_angle,
                m.good_object_count.map(|n| n as i64),
                m.median_mag_error,
                m.median_abs_dev_mag,
                m.median_background,
                m.stdev_background,
                m.median_s,
                m.median_d,
                m.detection_count.map(|n| n as i64),
                info,
            ],
        )
        .map_err(|e| conflict_or(e, &format!("{key}/{kind}")))?;
        tx.commit()?;
        info!(key = %key, reference_type = kind, frame = %reference.frame_path.display(),
            "Registered combined photometric reference");
        Ok(())
    }

    pub fn get_active_combined_ref(
        &self,
        key: &FrameKey,
        reference_type: ReferenceType,
    ) -> Result<CombinedPhotometricReference> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PHOTREF_COLUMNS} FROM photrefs
             WHERE field = ?1 AND projectid = ?2 AND ccd = ?3 AND photreftype = ?4 AND isactive = 1
             ORDER BY createdat DESC"
        ))?;
        let rows = stmt
            .query_map(
                params![key.field, key.project_id, key.ccd, reference_type.as_str()],
                photref_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        single_active(
            rows,
            "combined photometric reference",
            &format!("{key}/{reference_type}"),
        )
    }

    /// All combined references ever registered for `key` and type, newest first.
    pub fn combined_ref_history(
        &self,
        key: &FrameKey,
        reference_type: ReferenceType,
    ) -> Result<Vec<CombinedPhotometricReference>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PHOTREF_COLUMNS} FROM photrefs
             WHERE field = ?1 AND projectid = ?2 AND ccd = ?3 AND photreftype = ?4
             ORDER BY id DESC"
        ))?;
        let rows = stmt
            .query_map(
                params![key.field, key.project_id, key.ccd, reference_type.as_str()],
                photref_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Number of active rows for an astrometric key. More than one means the
    /// database predates the uniqueness index.
    pub fn active_astromref_count(&self, key: &FrameKey) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM astromrefs
             WHERE field = ?1 AND projectid = ?2 AND ccd = ?3 AND isactive = 1",
            params![key.field, key.project_id, key.ccd],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Ingested (object id, photometry line) pairs of one frame, ordered by line.
    pub fn iphot_objects(
        &self,
        frame_key: &str,
        reference_type: ReferenceType,
        direction: &str,
    ) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT objectid, photline FROM iphotobjects
             WHERE framekey = ?1 AND photreftype = ?2 AND subtracttype = ?3
             ORDER BY photline",
        )?;
        let rows = stmt
            .query_map(params![frame_key, reference_type.as_str(), direction], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn single_active<T>(mut rows: Vec<T>, kind: &'static str, key: &str) -> Result<T> {
    match rows.len() {
        0 => Err(IsmError::NotFound {
            kind,
            key: key.to_string(),
        }),
        1 => Ok(rows.remove(0)),
        n => Err(IsmError::RegistryConflict {
            key: key.to_string(),
            reason: format!("{n} active rows"),
        }),
    }
}

fn conflict_or(e: rusqlite::Error, key: &str) -> IsmError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => IsmError::RegistryConflict {
            key: key.to_string(),
            reason: e.to_string(),
        },
        _ => IsmError::Sqlite(e),
    }
}

pub(crate) fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// SQLite stores NaN as NULL.
fn real(row: &Row<'_>, idx: usize) -> rusqlite::Result<f64> {
    Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(f64::NAN))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn astromref_from_row(row: &Row<'_>) -> rusqlite::Result<AstrometricReference> {
    Ok(AstrometricReference {
        field: row.get(0)?,
        project_id: row.get(1)?,
        ccd: row.get(2)?,
        is_active: row.get(3)?,
        created_at: timestamp(row, 4)?,
        frame_path: PathBuf::from(row.get::<_, String>(5)?),
        jpeg_path: PathBuf::from(row.get::<_, String>(6)?),
        s_val: real(row, 7)?,
        d_val: real(row, 8)?,
        bg_val: real(row, 9)?,
        detection_count: row.get::<_, Option<i64>>(10)?.unwrap_or(0) as usize,
        comment: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
    })
}

fn photref_from_row(row: &Row<'_>) -> rusqlite::Result<CombinedPhotometricReference> {
    let kind: String = row.get(3)?;
    let reference_type = kind.parse::<ReferenceType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let info: String = row.get(24)?;
    let build: BuildInfo = serde_json::from_str(&info).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(24, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(CombinedPhotometricReference {
        field: row.get(0)?,
        project_id: row.get(1)?,
        ccd: row.get(2)?,
        reference_type,
        is_active: row.get(4)?,
        created_at: timestamp(row, 5)?,
        frame_path: PathBuf::from(row.get::<_, String>(6)?),
        jpeg_path: PathBuf::from(row.get::<_, String>(7)?),
        convolve_target_path: PathBuf::from(row.get::<_, String>(8)?),
        registration_file_path: PathBuf::from(row.get::<_, String>(9)?),
        calibration_photometry_path: PathBuf::from(row.get::<_, String>(10)?),
        target_metrics: QualityMetrics {
            zenith_distance: real(row, 11)?,
            moon_distance: real(row, 12)?,
            moon_elevation: real(row, 13)?,
            moon_phase: real(row, 14)?,
            hour_angle: real(row, 15)?,
            good_object_count: row.get::<_, Option<i64>>(16)?.map(|n| n as usize),
            median_mag_error: real(row, 17)?,
            median_abs_dev_mag: real(row, 18)?,
            median_background: real(row, 19)?,
            stdev_background: real(row, 20)?,
            median_s: real(row, 21)?,
            median_d: real(row, 22)?,
            detection_count: row.get::<_, Option<i64>>(23)?.map(|n| n as usize),
        },
        build,
    })
}

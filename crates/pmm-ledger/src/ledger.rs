//! Append-only JSON Lines fill ledger.
//!
//! One fill per line, flushed to stable storage before `append` returns.
//! The live segment rotates into the archive directory with an ISO-8601
//! timestamp suffix once it exceeds `max_bytes`. Windowed reads iterate
//! archived segments in name order (timestamps sort lexicographically)
//! before the live segment.

use crate::error::{LedgerError, LedgerResult};
use pmm_core::{Fill, MarketId};
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a single append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Fill timestamp regressed for its market; logged and discarded.
    OutOfOrder,
    /// Write failed; the fill is buffered in memory for retry and maker
    /// quoting should be suspended until the buffer drains.
    Buffered,
}

/// Durable, append-only record of every fill.
pub struct FillLedger {
    path: PathBuf,
    archive_dir: PathBuf,
    max_bytes: u64,
    /// Per-market monotonicity watermark, rebuilt from the live segment
    /// on open.
    last_ts_ms: HashMap<MarketId, i64>,
    /// Fills retained in memory after a failed write.
    pending: VecDeque<Fill>,
    /// Out-of-order rejections since open.
    rejected: u64,
}

impl FillLedger {
    /// Open (or create) the ledger at `path`, archiving into `archive_dir`.
    pub fn open(
        path: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        max_bytes: u64,
    ) -> LedgerResult<Self> {
        let path = path.into();
        let archive_dir = archive_dir.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&archive_dir)?;

        let mut ledger = Self {
            path,
            archive_dir,
            max_bytes,
            last_ts_ms: HashMap::new(),
            pending: VecDeque::new(),
            rejected: 0,
        };
        ledger.recover_watermarks()?;
        Ok(ledger)
    }

    /// Append a fill, flushing to stable storage before returning.
    ///
    /// Out-of-order fills (timestamp regression within a market) are
    /// rejected. Write failures buffer the fill and return `Buffered`;
    /// the caller is expected to suspend maker quoting until
    /// `retry_pending` drains the buffer.
    pub fn append(&mut self, fill: Fill) -> AppendOutcome {
        if let Some(&last) = self.last_ts_ms.get(&fill.market) {
            if fill.ts_ms < last {
                self.rejected += 1;
                warn!(
                    market = %fill.market,
                    ts_ms = fill.ts_ms,
                    last_ts_ms = last,
                    "out-of-order fill rejected"
                );
                return AppendOutcome::OutOfOrder;
            }
        }

        match self.write_line(&fill) {
            Ok(()) => {
                self.last_ts_ms.insert(fill.market.clone(), fill.ts_ms);
                AppendOutcome::Appended
            }
            Err(e) => {
                warn!(error = %e, "ledger append failed; buffering fill in memory");
                self.pending.push_back(fill);
                AppendOutcome::Buffered
            }
        }
    }

    /// Retry buffered fills in arrival order; stops at the first failure.
    /// Returns the number drained.
    pub fn retry_pending(&mut self) -> usize {
        let mut drained = 0;
        while let Some(fill) = self.pending.front().cloned() {
            if self.write_line(&fill).is_err() {
                break;
            }
            self.last_ts_ms.insert(fill.market.clone(), fill.ts_ms);
            self.pending.pop_front();
            drained += 1;
        }
        if drained > 0 {
            info!(drained, remaining = self.pending.len(), "ledger retry drained");
        }
        drained
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Lazy, ordered read of fills with `ts_ms` in `[start_ms, end_ms]`,
    /// across archived segments and the live segment.
    pub fn read_window(&self, start_ms: i64, end_ms: i64) -> LedgerResult<Vec<Fill>> {
        let mut out = Vec::new();
        for segment in self.segments_in_order()? {
            read_segment_into(&segment, start_ms, end_ms, &mut out)?;
        }
        Ok(out)
    }

    /// Read every fill in timestamp order (for replay).
    pub fn read_all(&self) -> LedgerResult<Vec<Fill>> {
        self.read_window(i64::MIN, i64::MAX)
    }

    /// Rotate the live segment into the archive if it exceeds `max_bytes`.
    pub fn rotate(&mut self) -> LedgerResult<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let size = std::fs::metadata(&self.path)?.len();
        if size < self.max_bytes {
            return Ok(None);
        }
        let archived = self.archive_path();
        std::fs::rename(&self.path, &archived)?;
        info!(archived = %archived.display(), bytes = size, "ledger segment rotated");
        Ok(Some(archived))
    }

    // ------------------------------------------------------------ private

    fn write_line(&mut self, fill: &Fill) -> LedgerResult<()> {
        let line = serde_json::to_string(fill)?;
        self.rotate_if_needed(line.len() as u64 + 1)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        // Synchronous flush: the record must hit stable storage before
        // the append is acknowledged.
        file.sync_data()?;
        Ok(())
    }

    fn rotate_if_needed(&mut self, incoming: u64) -> LedgerResult<()> {
        if self.max_bytes == 0 || !self.path.exists() {
            return Ok(());
        }
        let current = std::fs::metadata(&self.path)?.len();
        if current + incoming <= self.max_bytes {
            return Ok(());
        }
        let archived = self.archive_path();
        std::fs::rename(&self.path, &archived)?;
        debug!(archived = %archived.display(), "ledger segment rotated");
        Ok(())
    }

    fn archive_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut candidate = self.archive_dir.join(format!("fills-{stamp}.jsonl"));
        let mut suffix = 1u32;
        while candidate.exists() {
            candidate = self
                .archive_dir
                .join(format!("fills-{stamp}-{suffix}.jsonl"));
            suffix += 1;
        }
        candidate
    }

    fn segments_in_order(&self) -> LedgerResult<Vec<PathBuf>> {
        let mut segments: Vec<PathBuf> = Vec::new();
        if self.archive_dir.exists() {
            for entry in std::fs::read_dir(&self.archive_dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "jsonl") {
                    segments.push(path);
                }
            }
        }
        // ISO-8601 suffixes sort lexicographically in time order.
        segments.sort();
        if self.path.exists() {
            segments.push(self.path.clone());
        }
        Ok(segments)
    }

    fn recover_watermarks(&mut self) -> LedgerResult<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Fill>(&line) {
                Ok(fill) => {
                    self.last_ts_ms.insert(fill.market, fill.ts_ms);
                }
                // Torn trailing line from a crash; each record stands
                // alone so the rest of the segment is still valid.
                Err(e) => debug!(error = %e, "skipping malformed ledger line"),
            }
        }
        Ok(())
    }
}

fn read_segment_into(
    path: &Path,
    start_ms: i64,
    end_ms: i64,
    out: &mut Vec<Fill>,
) -> LedgerResult<()> {
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fill: Fill = match serde_json::from_str(&line) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, segment = %path.display(), "skipping malformed ledger line");
                continue;
            }
        };
        if fill.ts_ms >= start_ms && fill.ts_ms <= end_ms {
            out.push(fill);
        }
    }
    Ok(())
}

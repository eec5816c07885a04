use crate::device::DeviceCaps;
use crate::error::{EngineError, EngineErrorKind, EngineResult};
use cardio_proto::SECTOR_SHIFT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Scatter-list of byte-range lengths describing the request's data buffer.
///
/// Only the shape is carried here; the memory behind the ranges belongs to
/// the submitter and is resolved by the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentList(Vec<u32>);

impl SegmentList {
    pub fn new(lengths: Vec<u32>) -> Self {
        Self(lengths)
    }

    pub fn single(length: u32) -> Self {
        Self(vec![length])
    }

    pub fn lengths(&self) -> &[u32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.0.iter().map(|len| u64::from(*len)).sum()
    }

    /// The sub-list covering `[skip, skip + take)` bytes of this list.
    ///
    /// Boundary segments are shortened so the result never describes a byte
    /// outside the window; `take` past the end of the list is clipped.
    pub fn window(&self, skip: u64, take: u64) -> SegmentList {
        let mut out = Vec::new();
        let mut offset = 0u64;
        let end = skip.saturating_add(take);
        for len in &self.0 {
            let seg_start = offset;
            let seg_end = offset + u64::from(*len);
            offset = seg_end;
            if seg_end <= skip {
                continue;
            }
            if seg_start >= end {
                break;
            }
            let keep_start = seg_start.max(skip);
            let keep_end = seg_end.min(end);
            let keep = (keep_end - keep_start) as u32;
            if keep > 0 {
                out.push(keep);
            }
        }
        SegmentList(out)
    }
}

/// A logical I/O request handed in by the block layer.
///
/// Borrowed by the engine for the duration of processing; never retained
/// past completion.
#[derive(Clone, Debug)]
pub struct Request {
    pub start_sector: u64,
    pub sector_count: u32,
    pub direction: Direction,
    pub segments: SegmentList,
}

impl Request {
    pub fn new(
        start_sector: u64,
        sector_count: u32,
        direction: Direction,
        segments: SegmentList,
    ) -> Self {
        Self {
            start_sector,
            sector_count,
            direction,
            segments,
        }
    }

    /// Request whose buffer is a single contiguous range of the right size.
    pub fn contiguous(start_sector: u64, sector_count: u32, direction: Direction) -> Self {
        let bytes = u64::from(sector_count) << SECTOR_SHIFT;
        Self::new(
            start_sector,
            sector_count,
            direction,
            SegmentList::single(bytes as u32),
        )
    }

    pub fn total_bytes(&self) -> u64 {
        u64::from(self.sector_count) << SECTOR_SHIFT
    }

    pub(crate) fn validate(&self, caps: &DeviceCaps) -> EngineResult<()> {
        if self.sector_count == 0 {
            return Err(EngineError::with_message(
                EngineErrorKind::InvalidRequest,
                "zero-length request",
            ));
        }
        if self.segments.total_bytes() != self.total_bytes() {
            return Err(EngineError::with_message(
                EngineErrorKind::InvalidRequest,
                "buffer does not cover the requested sectors",
            ));
        }
        if self.direction == Direction::Write && caps.read_only {
            return Err(EngineError::with_message(
                EngineErrorKind::InvalidRequest,
                "device is read-only",
            ));
        }
        let end = self
            .start_sector
            .checked_add(u64::from(self.sector_count))
            .ok_or_else(|| {
                EngineError::with_message(EngineErrorKind::InvalidRequest, "sector range overflow")
            })?;
        // The command argument is 32 bits wide: a sector number for
        // block-addressed media, a byte offset otherwise.
        let addressable = if caps.block_addressed {
            u64::from(u32::MAX)
        } else {
            u64::from(u32::MAX) >> SECTOR_SHIFT
        };
        if end > addressable + 1 {
            return Err(EngineError::with_message(
                EngineErrorKind::InvalidRequest,
                "request beyond addressable range",
            ));
        }
        Ok(())
    }
}

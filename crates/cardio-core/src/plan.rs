use crate::device::DeviceCaps;
use crate::request::{Direction, Request, SegmentList};
use cardio_proto::{OpCode, SECTOR_SHIFT, SECTOR_SIZE};
use std::time::Duration;

/// One concrete command covering a contiguous sector range of the request.
#[derive(Clone, Debug)]
pub struct TransferPlan {
    pub opcode: OpCode,
    pub start_sector: u64,
    pub block_count: u32,
    /// Multi-block transfers terminate with a stop command.
    pub uses_stop: bool,
    pub timeout: Duration,
    pub segments: SegmentList,
}

impl TransferPlan {
    pub fn direction(&self) -> Direction {
        if self.opcode.is_read() {
            Direction::Read
        } else {
            Direction::Write
        }
    }

    pub fn byte_len(&self) -> u32 {
        self.block_count * SECTOR_SIZE
    }

    /// Command argument for the data command: sector number on
    /// block-addressed media, byte offset otherwise. Range checked at
    /// request validation.
    pub fn argument(&self, caps: &DeviceCaps) -> u32 {
        if caps.block_addressed {
            self.start_sector as u32
        } else {
            (self.start_sector << SECTOR_SHIFT) as u32
        }
    }
}

/// Produces the lazy plan sequence for one request.
///
/// Replanning after a failure is just calling [`next_plan`] again without
/// [`advance`]: the planner rebuilds from the first uncompleted sector with
/// whatever mode is in force at that moment.
///
/// [`next_plan`]: TransferPlanner::next_plan
/// [`advance`]: TransferPlanner::advance
pub struct TransferPlanner<'r> {
    request: &'r Request,
    caps: DeviceCaps,
    completed_blocks: u32,
    single_block_only: bool,
}

impl<'r> TransferPlanner<'r> {
    /// The request must have passed validation.
    pub fn new(request: &'r Request, caps: &DeviceCaps) -> Self {
        Self {
            request,
            caps: caps.clone(),
            completed_blocks: 0,
            single_block_only: false,
        }
    }

    /// Stop producing multi-block plans for the rest of this request, so a
    /// failing sector can be isolated one block at a time.
    pub fn force_single_block(&mut self) {
        self.single_block_only = true;
    }

    pub fn is_single_block_only(&self) -> bool {
        self.single_block_only
    }

    /// Record that `blocks` from the current position completed.
    pub fn advance(&mut self, blocks: u32) {
        debug_assert!(blocks <= self.remaining_blocks());
        self.completed_blocks += blocks;
    }

    pub fn completed_blocks(&self) -> u32 {
        self.completed_blocks
    }

    pub fn remaining_blocks(&self) -> u32 {
        self.request.sector_count - self.completed_blocks
    }

    pub fn next_plan(&self) -> Option<TransferPlan> {
        let remaining = self.remaining_blocks();
        if remaining == 0 {
            return None;
        }

        let mut block_count = remaining.min(self.caps.max_block_count).max(1);
        if block_count > 1 && (self.single_block_only || !self.caps.supports_multi_block) {
            block_count = 1;
        }

        let multi = block_count > 1;
        let opcode = match (self.request.direction, multi) {
            (Direction::Read, true) => OpCode::ReadMulti,
            (Direction::Read, false) => OpCode::ReadSingle,
            (Direction::Write, true) => OpCode::WriteMulti,
            (Direction::Write, false) => OpCode::WriteSingle,
        };
        let timeout = match self.request.direction {
            Direction::Read => self.caps.read_timeout,
            Direction::Write => self.caps.write_timeout,
        };

        let skip = u64::from(self.completed_blocks) << SECTOR_SHIFT;
        let take = u64::from(block_count) << SECTOR_SHIFT;

        Some(TransferPlan {
            opcode,
            start_sector: self.request.start_sector + u64::from(self.completed_blocks),
            block_count,
            uses_stop: multi,
            timeout,
            segments: self.request.segments.window(skip, take),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(max_block_count: u32) -> DeviceCaps {
        DeviceCaps {
            max_block_count,
            ..DeviceCaps::default()
        }
    }

    #[test]
    fn multi_block_plan_covers_whole_request() {
        let req = Request::contiguous(100, 32, Direction::Read);
        let planner = TransferPlanner::new(&req, &caps(64));
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.opcode, OpCode::ReadMulti);
        assert_eq!(plan.start_sector, 100);
        assert_eq!(plan.block_count, 32);
        assert!(plan.uses_stop);
        assert_eq!(plan.segments.total_bytes(), 32 * 512);
    }

    #[test]
    fn caps_limit_block_count() {
        let req = Request::contiguous(0, 100, Direction::Write);
        let mut planner = TransferPlanner::new(&req, &caps(16));
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.block_count, 16);
        assert_eq!(plan.segments.total_bytes(), 16 * 512);

        planner.advance(16);
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.start_sector, 16);
        assert_eq!(plan.block_count, 16);
    }

    #[test]
    fn plans_account_for_every_sector() {
        let req = Request::contiguous(0, 100, Direction::Read);
        let mut planner = TransferPlanner::new(&req, &caps(16));
        let mut covered = 0;
        while let Some(plan) = planner.next_plan() {
            covered += plan.block_count;
            planner.advance(plan.block_count);
        }
        assert_eq!(covered, 100);
    }

    #[test]
    fn single_block_mode_sticks() {
        let req = Request::contiguous(10, 8, Direction::Read);
        let mut planner = TransferPlanner::new(&req, &caps(64));
        planner.advance(2);
        planner.force_single_block();

        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.opcode, OpCode::ReadSingle);
        assert_eq!(plan.start_sector, 12);
        assert_eq!(plan.block_count, 1);
        assert!(!plan.uses_stop);

        planner.advance(1);
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.opcode, OpCode::ReadSingle);
        assert_eq!(plan.start_sector, 13);
    }

    #[test]
    fn device_without_multi_block_support() {
        let caps = DeviceCaps {
            supports_multi_block: false,
            ..DeviceCaps::default()
        };
        let req = Request::contiguous(0, 4, Direction::Write);
        let planner = TransferPlanner::new(&req, &caps);
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.opcode, OpCode::WriteSingle);
        assert_eq!(plan.block_count, 1);
    }

    #[test]
    fn last_sector_is_single_block() {
        let req = Request::contiguous(0, 17, Direction::Read);
        let mut planner = TransferPlanner::new(&req, &caps(16));
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.block_count, 16);
        planner.advance(16);
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.opcode, OpCode::ReadSingle);
        assert_eq!(plan.block_count, 1);
        assert!(!plan.uses_stop);
    }

    #[test]
    fn byte_addressed_argument_is_shifted() {
        let req = Request::contiguous(8, 1, Direction::Read);
        let byte_caps = DeviceCaps {
            block_addressed: false,
            ..DeviceCaps::default()
        };
        let planner = TransferPlanner::new(&req, &byte_caps);
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.argument(&byte_caps), 8 << 9);

        let block_caps = DeviceCaps::default();
        assert_eq!(plan.argument(&block_caps), 8);
    }

    #[test]
    fn scattered_buffer_is_windowed_per_plan() {
        let req = Request::new(
            0,
            4,
            Direction::Read,
            SegmentList::new(vec![512, 1024, 512]),
        );
        let mut planner = TransferPlanner::new(&req, &caps(2));
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.segments.lengths(), &[512, 512]);
        planner.advance(2);
        let plan = planner.next_plan().unwrap();
        assert_eq!(plan.segments.lengths(), &[512, 512]);
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod address;
mod descriptor;
mod segment;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::convert::TryFrom;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    address::{
        block_dist,
        block_owner,
        GlobalAddress,
    },
    descriptor::{
        DescriptorPool,
        MemoryDescriptor,
    },
    segment::Segment,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Kind of a memory operation. The set of operations is closed.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operation {
    /// Returns the target word.
    Read = 0,
    /// Stores `data` in the target word.
    Write = 1,
    /// Adds `data` to the target word, returning its previous value.
    FetchAdd = 2,
    /// Stores `data` in the target word if it holds `aux`, returning its previous value.
    CompareSwap = 3,
    /// Shuts down the delegate queue it is sent on.
    Quit = 4,
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<Operation> for u8 {
    fn from(operation: Operation) -> Self {
        operation as u8
    }
}

impl TryFrom<u8> for Operation {
    type Error = Fail;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Operation::Read),
            1 => Ok(Operation::Write),
            2 => Ok(Operation::FetchAdd),
            3 => Ok(Operation::CompareSwap),
            4 => Ok(Operation::Quit),
            _ => Err(Fail::new(libc::EINVAL, &format!("unknown operation tag (tag={:?})", tag))),
        }
    }
}

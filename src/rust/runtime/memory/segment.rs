// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    memory::Operation,
    types::Word,
};
use ::std::sync::{
    atomic::{
        AtomicI64,
        Ordering,
    },
    Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Local memory of a node: a fixed array of words shared by the delegate clients, the delegate server and the message
/// handlers of that node.
#[derive(Clone)]
pub struct Segment {
    words: Arc<[AtomicI64]>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Segment {
    /// Creates a zero-filled segment.
    pub fn new(num_words: usize) -> Self {
        Self {
            words: (0..num_words).map(|_| AtomicI64::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn word(&self, offset: usize) -> &AtomicI64 {
        match self.words.get(offset) {
            Some(word) => word,
            None => panic!("word(): offset out of range (offset={}, len={})", offset, self.words.len()),
        }
    }

    /// Performs a memory operation on the word at `offset` and returns its result. `Quit` is not a memory operation.
    pub fn execute(&self, operation: Operation, offset: usize, data: Word, aux: Word) -> Word {
        let word: &AtomicI64 = self.word(offset);
        match operation {
            Operation::Read => word.load(Ordering::Acquire),
            Operation::Write => {
                word.store(data, Ordering::Release);
                data
            },
            Operation::FetchAdd => word.fetch_add(data, Ordering::AcqRel),
            Operation::CompareSwap => match word.compare_exchange(aux, data, Ordering::AcqRel, Ordering::Acquire) {
                Ok(previous) | Err(previous) => previous,
            },
            Operation::Quit => panic!("execute(): quit is not a memory operation"),
        }
    }

    pub fn read(&self, offset: usize) -> Word {
        self.execute(Operation::Read, offset, 0, 0)
    }

    pub fn write(&self, offset: usize, value: Word) {
        self.execute(Operation::Write, offset, value, 0);
    }

    /// Hints the hardware that the word at `offset` is about to be used.
    pub fn prefetch(&self, offset: usize) {
        prefetch_word(self.word(offset));
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        fn prefetch_word(word: &AtomicI64) {
            use ::std::arch::x86_64::{
                _mm_prefetch,
                _MM_HINT_T0,
            };
            unsafe { _mm_prefetch::<_MM_HINT_T0>(word.as_ptr() as *const i8) };
        }
    } else {
        fn prefetch_word(_word: &AtomicI64) {}
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

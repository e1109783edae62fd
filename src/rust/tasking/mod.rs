// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod joiner;
pub mod parallel_for;
pub mod steal_queue;

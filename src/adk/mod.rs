// SPDX-License-Identifier: MIT

pub mod error;
pub mod reasoner;
pub mod tool;

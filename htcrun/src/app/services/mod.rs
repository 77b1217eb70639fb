// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod condor;
pub mod dependencies;
pub mod packager;
pub mod scripts;
pub mod shell;
pub mod submit_file;

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod command_channel;

pub use command_channel::{CommandChannel, EXISTS_SENTINEL, ExecCapture};

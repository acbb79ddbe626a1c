// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C11 — the cluster session plane: the single long-lived IPT connection
//! to the master, its `client_req`/`client_res` envelope codec, and the
//! sequence-keyed request/response dispatch (§4.10).

pub mod envelope;
pub mod session;

pub use envelope::{ClusterVerb, Envelope};
pub use session::ClusterSession;

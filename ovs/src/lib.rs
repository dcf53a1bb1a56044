/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
 */

//! `ovs` models an OpenFlow-speaking datapath as a small, transport-agnostic contract.
//!
//! The wire codec for OpenFlow 1.0 plus the Nicira extensions (`NXM`, resubmit,
//! `set_tunnel`) is treated as an external collaborator: this crate defines the
//! [`DatapathSession`] trait that any such codec implements, the pure-data
//! [`FlowMod`]/[`Match`]/[`Action`] types that describe what to install, and the
//! table/priority layout of the GRE overlay pipeline that the programmer targets.
//! [`SimulatedSession`] is the one concrete `DatapathSession` this workspace ships:
//! an in-memory datapath used by the controller binary's default wiring and by
//! every test in this workspace in place of a real switch.

pub mod ids;
pub mod port;
pub mod flow;
pub mod session;
pub mod simulated;

pub use ids::{Dpid, MacAddress, PortNo};
pub use port::PortState;
pub use flow::{Action, FlowMod, FlowModCommand, Match, Table};
pub use session::{DatapathSession, DpEvent, FlowFormat, SessionError};
pub use simulated::SimulatedSession;

/// `OFP_DEFAULT_PRIORITY`, the base priority `P` that the table layout in
/// [`flow`] divides down for drop and catch-all rules.
pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

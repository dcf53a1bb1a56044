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

// Derived from lib/fatal-signal.c in Open vSwitch, with the following license:
/*
 * Copyright (c) 2008, 2009, 2010, 2011, 2012, 2013 Nicira, Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at:
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Deleting a pidfile on exit, even an unclean one, is the one cleanup
//! obligation this controller actually has (it never forks helper processes
//! or creates scratch directories of its own), so this module only keeps the
//! slice of OVS's `fatal-signal.c` that covers that: a registry of files to
//! remove, run either on `Drop` or from a signal-handling thread when the
//! process is killed by `SIGTERM`/`SIGINT`/`SIGHUP`/`SIGALRM`.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use signal_hook::{self, consts::signal::*, iterator::Signals};
use std::collections::{HashMap, HashSet};
use std::default::Default;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tracing::{event, Level};

#[cfg(doc)]
use crate::Daemonize;

#[derive(Default)]
struct Actions {
    remove_files: HashSet<PathBuf>,
}

impl Actions {
    fn new() -> Actions {
        Default::default()
    }

    fn run(&mut self) {
        for file in self.remove_files.drain() {
            if let Err(err) = fs::remove_file(&file) {
                event!(Level::WARN, "{}: removing file failed ({err})", file.to_string_lossy());
            }
        }
    }
}

/// A singleton object that frees resources in reaction to a fatal signal.
struct SignalHandler {
    actions: Arc<Mutex<HashMap<u64, Arc<Mutex<Actions>>>>>,
    next_id: u64
}

impl SignalHandler {
    fn new() -> Result<SignalHandler> {
        let mut signals = Signals::new(&[SIGTERM, SIGINT, SIGHUP, SIGALRM])?;
        let actions: Arc<Mutex<HashMap<u64, Arc<Mutex<Actions>>>>>
            = Arc::new(Mutex::new(HashMap::new()));
        let actions2 = actions.clone();
        thread::spawn(move || {
            for signal in signals.forever() {
                for (_k, v) in actions2.lock().unwrap().drain() {
                    v.lock().unwrap().run();
                }
                signal_hook::low_level::emulate_default_handler(signal).unwrap();
                unreachable!();
            }
            for (_k, v) in actions2.lock().unwrap().drain() {
                v.lock().unwrap().run();
            }
        });
        Ok(SignalHandler { actions, next_id: 0 })
    }

    fn instance() -> MutexGuard<'static, Result<Self>> {
        lazy_static! {
            static ref INSTANCE: Mutex<Result<SignalHandler>> = Mutex::new(SignalHandler::new());
        }
        INSTANCE.lock().unwrap()
    }

    /// Creates a new `Actions`, adds it to the collection of those that will be invoked when the
    /// process terminates, and returns it along with an ID that may be used to remove it later.
    fn add_actions() -> Result<(u64, Arc<Mutex<Actions>>)> {
        match *Self::instance() {
            Err(ref e) => Err(anyhow!("{e}")),
            Ok(ref mut instance) => {
                let id = instance.next_id;
                instance.next_id += 1;
                let actions = Arc::new(Mutex::new(Actions::new()));
                instance.actions.lock().unwrap().insert(id, actions.clone());
                Ok((id, actions))
            }
        }
    }

    /// Removes the `Actions` with the given `id` from the collection (if any).  If `run` is true,
    /// runs the associated actions, otherwise skips them.
    fn remove_actions(id: u64, run: bool) {
        if let Ok(ref mut instance) = *Self::instance() {
            if let Some(actions) = instance.actions.lock().unwrap().remove(&id) {
                if run {
                    actions.lock().unwrap().run();
                }
            }
        }
    }
}

/// Deletes registered files when dropped or when the process dies due to a fatal signal.
///
/// [`Daemonize::start`] hands one of these back alongside [`Daemonizing`](crate::Daemonizing); the
/// caller's only job is to keep it alive for as long as the pidfile it was used to create should
/// exist.
pub struct Cleanup {
    actions: Arc<Mutex<Actions>>,
    actions_id: u64
}

impl Cleanup {
    /// Creates a new `Cleanup`, registering signal handlers the first time one is created.
    ///
    /// The signal-handling thread this spins up (on first use) means a process that forks should
    /// create its `Cleanup` only in the child, never in the parent — cleanup on `Drop` still works
    /// either way, but cleanup from a signal would otherwise race two processes over the same
    /// registry.
    pub fn new() -> Result<Cleanup> {
        let (actions_id, actions) = SignalHandler::add_actions()?;
        Ok(Cleanup { actions, actions_id })
    }

    /// Registers `file` to be deleted on exit.
    pub fn register_remove_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        self.actions.lock().unwrap().remove_files.insert(absolute_path(file.as_ref())?);
        Ok(())
    }
}

impl Drop for Cleanup {
    /// Deletes every file registered with this `Cleanup`.
    fn drop(&mut self) {
        SignalHandler::remove_actions(self.actions_id, true);
    }
}

// When std::path::absolute() becomes stable, we should use that instead.
fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(PathBuf::from(path))
    } else {
        let mut abspath = std::env::current_dir()?;
        abspath.extend(path);
        Ok(abspath)
    }
}

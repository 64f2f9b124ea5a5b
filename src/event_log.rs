// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;
use log::{debug, Level, Record};
use log4rs::append::file::FileAppender;
use log4rs::append::Append;
use log4rs::encode::pattern::PatternEncoder;
use serde::Serialize;

use crate::definitions::{RobotCommand, RobotFeedback, RobotStateInfo, Team};

/// Append-only record of the traffic passing through the hub.
pub trait EventLogger: Send + Sync {
    fn log_commands(&self, team: Team, commands: &[RobotCommand]);

    fn log_feedback(&self, feedback: &RobotFeedback);

    fn log_state_info(&self, info: &RobotStateInfo);
}

pub struct NoopEventLogger;

impl EventLogger for NoopEventLogger {
    fn log_commands(&self, _team: Team, _commands: &[RobotCommand]) {}

    fn log_feedback(&self, _feedback: &RobotFeedback) {}

    fn log_state_info(&self, _info: &RobotStateInfo) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Commands,
    Feedback,
    StateInfo,
}

impl EventCategory {
    pub const ALL: [EventCategory; 3] = [EventCategory::Commands, EventCategory::Feedback, EventCategory::StateInfo];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCategory::Commands => write!(f, "commands"),
            EventCategory::Feedback => write!(f, "feedback"),
            EventCategory::StateInfo => write!(f, "state_info"),
        }
    }
}

fn event_pattern() -> PatternEncoder {
    PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} {m}{n}")
}

pub fn log_file_name(category: EventCategory, started_at: chrono::DateTime<Local>) -> String {
    format!("{}_{}.log", category, started_at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Files roll over once they grew past this size.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Timestamp written by [`event_pattern`] in front of every line.
const TIMESTAMP_LEN: u64 = 24;

struct CategoryFile {
    appender: FileAppender,
    path: PathBuf,
    written: u64,
}

/// Writes one timestamped line per event into a file per category.
///
/// A file that grew past the size limit is closed and a new one named by the
/// current time is started. The appenders are used directly, log4rs is never
/// installed as the global logger.
pub struct FileEventLogger {
    log_dir: PathBuf,
    max_file_size: u64,
    files: [Mutex<CategoryFile>; 3],
}

impl FileEventLogger {
    /// Creates the directory if needed and opens the files for the current time.
    pub fn create(log_dir: &Path) -> io::Result<Self> {
        Self::with_max_file_size(log_dir, DEFAULT_MAX_FILE_SIZE)
    }

    pub fn with_max_file_size(log_dir: &Path, max_file_size: u64) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let [commands, feedback, state_info] = EventCategory::ALL;
        let files = [
            Mutex::new(open_category_file(log_dir, commands)?),
            Mutex::new(open_category_file(log_dir, feedback)?),
            Mutex::new(open_category_file(log_dir, state_info)?),
        ];
        debug!("Event logs created in {}", log_dir.display());
        Ok(Self { log_dir: log_dir.to_path_buf(), max_file_size, files })
    }

    fn file(&self, category: EventCategory) -> MutexGuard<'_, CategoryFile> {
        self.files[category.index()].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// File currently written for `category`.
    pub fn path(&self, category: EventCategory) -> PathBuf {
        self.file(category).path.clone()
    }

    fn append<T: Serialize>(&self, category: EventCategory, team: Team, event: &T) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                debug!("Could not serialize {} event: {}", category, e);
                return;
            }
        };
        let mut file = self.file(category);
        if file.written >= self.max_file_size {
            match open_category_file(&self.log_dir, category) {
                Ok(next) => {
                    file.appender.flush();
                    debug!("Rolling {} log over to {}", category, next.path.display());
                    *file = next;
                }
                Err(e) => debug!("Could not roll {} log: {}", category, e),
            }
        }
        let line = format!("{} {}", team, line);
        let result = file.appender.append(
            &Record::builder()
                .level(Level::Info)
                .target("robothub::events")
                .args(format_args!("{}", line))
                .build(),
        );
        match result {
            Ok(()) => file.written += TIMESTAMP_LEN + line.len() as u64 + 1,
            Err(e) => debug!("Could not write {} event: {}", category, e),
        }
    }

    pub fn flush(&self) {
        for category in EventCategory::ALL {
            self.file(category).appender.flush();
        }
    }
}

/// Opens a fresh file for `category`, named by the current time.
fn open_category_file(log_dir: &Path, category: EventCategory) -> io::Result<CategoryFile> {
    let name = log_file_name(category, Local::now());
    let mut path = log_dir.join(&name);
    let mut suffix = 1;
    while path.exists() {
        path = log_dir.join(format!("{}_{}.log", name.trim_end_matches(".log"), suffix));
        suffix += 1;
    }
    let appender = FileAppender::builder().encoder(Box::new(event_pattern())).append(true).build(&path)?;
    Ok(CategoryFile { appender, path, written: 0 })
}

impl EventLogger for FileEventLogger {
    fn log_commands(&self, team: Team, commands: &[RobotCommand]) {
        for command in commands {
            self.append(EventCategory::Commands, team, command);
        }
    }

    fn log_feedback(&self, feedback: &RobotFeedback) {
        self.append(EventCategory::Feedback, feedback.team, feedback);
    }

    fn log_state_info(&self, info: &RobotStateInfo) {
        self.append(EventCategory::StateInfo, info.team, info);
    }
}

impl Drop for FileEventLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

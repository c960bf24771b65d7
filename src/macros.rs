// Copyright 2025 jonefeewang@gmail.com
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

/// Forwards a formatted debug message to a [`LogSink`](crate::LogSink),
/// tagged with the calling file and line.
macro_rules! sink_debug {
    ($sink:expr, $($arg:tt)*) => {
        $crate::service::LogSink::log_debug(&*$sink, file!(), line!(), &format!($($arg)*))
    };
}

/// Forwards a formatted error message to a [`LogSink`](crate::LogSink),
/// tagged with the calling file and line.
macro_rules! sink_error {
    ($sink:expr, $($arg:tt)*) => {
        $crate::service::LogSink::log_error(&*$sink, file!(), line!(), &format!($($arg)*))
    };
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

macro_rules! lab_log {
    (
        $log:expr, $level:ident, $unit:expr, $msg:expr, $($args:expr),*;
        $($key:expr => $value:expr),*
    ) => {
        slog::$level!($log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_VLAB,
            "unit" => $unit,
            $($key => $value),*
        )
    };
    (
        $log:expr, $level:ident, $unit:expr, $msg:expr;
        $($key:expr => $value:expr),*
    ) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_VLAB,
            "unit" => $unit,
            $($key => $value),*
        )
    };
    ($log:expr, $level:ident, $unit:expr, $msg:expr) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_VLAB,
            "unit" => $unit
        )
    };
    ($log:expr, $level:ident, $unit:expr, $msg:expr, $($args:expr),*) => {
        slog::$level!($log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_VLAB,
            "unit" => $unit,
        )
    };
}

pub(crate) use lab_log;

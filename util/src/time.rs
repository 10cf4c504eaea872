// Copyright (c) 2024 Huawei Technologies Co.,Ltd. All rights reserved.
//
// KexecLintel is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use anyhow::Result;
use nix::time::{clock_gettime, ClockId};

pub const NANOSECONDS_PER_SECOND: u64 = 1_000_000_000;

const SECONDS_PER_DAY: i64 = 86_400;

/// Wall-clock time as (seconds, nanoseconds) since the epoch.
pub fn gettime() -> Result<(u64, u64)> {
    let ts = clock_gettime(ClockId::CLOCK_REALTIME)?;
    Ok((ts.tv_sec() as u64, ts.tv_nsec() as u64))
}

/// Break seconds since the epoch into [year, month, day, hour, min, sec],
/// UTC. Civil-from-days conversion after Howard Hinnant's date algorithms.
pub fn get_format_time(sec: i64) -> [i32; 6] {
    let days = sec.div_euclid(SECONDS_PER_DAY);
    let rem = sec.rem_euclid(SECONDS_PER_DAY);

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let mut year = yoe + era * 400;
    if month <= 2 {
        year += 1;
    }

    [
        year as i32,
        month as i32,
        day as i32,
        (rem / 3600) as i32,
        (rem / 60 % 60) as i32,
        (rem % 60) as i32,
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_time_epoch() {
        assert_eq!(get_format_time(0), [1970, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_format_time_known_instants() {
        // date -u -d @1700000000 => Tue Nov 14 22:13:20 UTC 2023
        assert_eq!(get_format_time(1_700_000_000), [2023, 11, 14, 22, 13, 20]);
        // Leap day.
        assert_eq!(get_format_time(951_782_400), [2000, 2, 29, 0, 0, 0]);
    }
}

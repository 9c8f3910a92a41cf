//! Parsers for the few `/proc` files the runtime collector reads.
//!
//! Pure functions over string content so they can be tested without a host.

/// `USER_HZ`, fixed at 100 on every Linux ABI the agent targets.
pub const CLOCK_TICKS_PER_SEC: u64 = 100;
/// `/proc/self/stat` reports RSS in pages.
pub const PAGE_SIZE: u64 = 4096;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Memory totals from `/proc/meminfo`, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
}

pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let parse_kb = |line: &str| -> Result<u64, ParseError> {
        line.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .ok_or_else(|| ParseError::new(format!("bad meminfo line: {line}")))
    };

    let mut total = None;
    let mut free = None;
    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            total = Some(parse_kb(line)?);
        } else if line.starts_with("MemFree:") {
            free = Some(parse_kb(line)?);
        }
    }

    match (total, free) {
        (Some(total), Some(free)) => Ok(MemInfo { total, free }),
        _ => Err(ParseError::new("MemTotal or MemFree missing")),
    }
}

/// Aggregate `cpu` line of `/proc/stat`, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub idle: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.busy + self.idle
    }

    /// Busy share in percent between `prev` and `self`, `None` when no
    /// ticks elapsed.
    pub fn utilization_since(&self, prev: &CpuTimes) -> Option<f64> {
        let total = self.total().checked_sub(prev.total())?;
        if total == 0 {
            return None;
        }
        let busy = self.busy.saturating_sub(prev.busy);
        Some(busy as f64 * 100.0 / total as f64)
    }
}

pub fn parse_cpu_times(content: &str) -> Result<CpuTimes, ParseError> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| ParseError::new("no aggregate cpu line in /proc/stat"))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|s| s.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|e| ParseError::new(format!("bad cpu field: {e}")))?;
    if fields.len() < 4 {
        return Err(ParseError::new("cpu line has fewer than 4 fields"));
    }

    // user nice system idle iowait irq softirq steal (guest is counted in user)
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let busy = fields.iter().take(8).sum::<u64>() - idle;
    Ok(CpuTimes { busy, idle })
}

/// Fields of `/proc/self/stat` the agent reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStat {
    pub minflt: u64,
    pub majflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub num_threads: u64,
    pub vsize: u64,
    pub rss_pages: u64,
}

impl ProcessStat {
    pub fn cpu_seconds(&self) -> f64 {
        (self.utime + self.stime) as f64 / CLOCK_TICKS_PER_SEC as f64
    }

    pub fn rss_bytes(&self) -> u64 {
        self.rss_pages * PAGE_SIZE
    }
}

/// The comm field may contain spaces and parentheses, so fields are counted
/// from the last `)`.
pub fn parse_process_stat(content: &str) -> Result<ProcessStat, ParseError> {
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 22 {
        return Err(ParseError::new(format!(
            "stat has {} fields after comm, expected at least 22",
            fields.len()
        )));
    }

    let field = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields[idx]
            .parse::<i64>()
            .map(|v| v.max(0) as u64)
            .map_err(|_| ParseError::new(format!("invalid {name}: {}", fields[idx])))
    };

    Ok(ProcessStat {
        minflt: field(7, "minflt")?,
        majflt: field(9, "majflt")?,
        utime: field(11, "utime")?,
        stime: field(12, "stime")?,
        num_threads: field(17, "num_threads")?,
        vsize: field(20, "vsize")?,
        rss_pages: field(21, "rss")?,
    })
}

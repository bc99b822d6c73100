//! Muestreo de recursos del sistema desde `/proc`.
//!
//! El uso de CPU se calcula como la variación entre dos muestras sucesivas
//! de `/proc/stat`, por lo que la primera consulta reporta 0. La memoria
//! sale de `MemTotal` y `MemAvailable` en `/proc/meminfo`.


use tracing::warn;
use crate::sysmon::domain::SystemStats;
use crate::system::domain::GatewayError;


/// Monitor con el estado de la muestra anterior de CPU.
pub struct SysMonitor {
    prev_total: u64,
    prev_idle: u64,
    first_sample: bool,
}


impl SysMonitor {
    pub fn new() -> Self {
        Self { prev_total: 0, prev_idle: 0, first_sample: true }
    }

    /// Toma una muestra de CPU y memoria.
    pub fn sample(&mut self) -> Result<SystemStats, GatewayError> {
        let stat = std::fs::read_to_string("/proc/stat")?;
        let (total, idle) = parse_cpu_times(&stat).ok_or_else(|| {
            GatewayError::InvalidArgument("no se pudo parsear /proc/stat".to_string())
        })?;

        let cpu_usage_percent = if self.first_sample {
            self.first_sample = false;
            0.0
        } else {
            let delta_total = total.saturating_sub(self.prev_total);
            let delta_idle = idle.saturating_sub(self.prev_idle);
            if delta_total == 0 {
                0.0
            } else {
                100.0 * delta_total.saturating_sub(delta_idle) as f64 / delta_total as f64
            }
        };
        self.prev_total = total;
        self.prev_idle = idle;

        let meminfo = std::fs::read_to_string("/proc/meminfo")?;
        let total_kb = parse_mem_value(&meminfo, "MemTotal");
        let available_kb = parse_mem_value(&meminfo, "MemAvailable");
        let (ram_total_kb, ram_used_kb, ram_usage_percent) = match (total_kb, available_kb) {
            (Some(total), Some(available)) if total > 0 => {
                let used = total - available;
                (total, used, 100.0 * used as f64 / total as f64)
            }
            _ => {
                warn!("Warning: no se pudo parsear /proc/meminfo");
                (-1, -1, -1.0)
            }
        };

        Ok(SystemStats {
            cpu_usage_percent,
            ram_usage_percent,
            ram_used_kb,
            ram_total_kb,
        })
    }
}

impl Default for SysMonitor {
    fn default() -> Self {
        Self::new()
    }
}


/// Extrae (tiempo total, tiempo ocioso) de la primera línea de `/proc/stat`.
///
/// El tiempo ocioso suma los campos idle e iowait.
fn parse_cpu_times(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().next()?;
    if !line.starts_with("cpu ") {
        return None;
    }

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(7)
        .map(|f| f.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;
    if fields.len() < 7 {
        return None;
    }

    let total: u64 = fields.iter().sum();
    let idle = fields[3] + fields[4];
    Some((total, idle))
}


/// Busca el valor en kB de una clave de `/proc/meminfo`.
fn parse_mem_value(meminfo: &str, key: &str) -> Option<i64> {
    for line in meminfo.lines() {
        let mut parts = line.splitn(2, ':');
        if parts.next()?.trim() != key {
            continue;
        }
        let value = parts.next()?.trim().trim_end_matches(" kB").trim();
        return value.parse::<i64>().ok();
    }
    None
}

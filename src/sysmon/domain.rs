/// Instantánea de uso de recursos del sistema.
#[derive(Debug, Clone, Copy)]
pub struct SystemStats {
    pub cpu_usage_percent: f64,
    pub ram_usage_percent: f64,
    pub ram_used_kb: i64,
    pub ram_total_kb: i64,
}

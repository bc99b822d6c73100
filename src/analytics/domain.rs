//! Dominio de la analítica: estadísticas incrementales por sensor.


use crate::config::analytics::{
    INITIAL_STATS_CAPACITY, TEMP_TOO_COLD_THRESHOLD, TEMP_TOO_HOT_THRESHOLD,
};


/// Clasificación del promedio móvil de temperatura de un sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempState {
    Normal,
    TooCold,
    TooHot,
}

impl TempState {
    /// Clasifica un promedio contra los umbrales configurados.
    pub fn classify(avg: f64) -> TempState {
        if avg < TEMP_TOO_COLD_THRESHOLD {
            TempState::TooCold
        } else if avg > TEMP_TOO_HOT_THRESHOLD {
            TempState::TooHot
        } else {
            TempState::Normal
        }
    }
}


/// Estadísticas acumuladas de un sensor.
///
/// El promedio se calcula a demanda como `sum / count`; `count` es al menos
/// 1 para toda entrada existente.
#[derive(Debug, Clone)]
pub struct SensorStats {
    pub id: u16,
    pub sum: f64,
    pub count: u64,
    pub last_state: TempState,
}

impl SensorStats {
    pub fn average(&self) -> f64 {
        self.sum / self.count as f64
    }
}


/// Cambio de estado detectado al aplicar una lectura.
///
/// Se emite solo en las transiciones: la histéresis evita repetir la misma
/// alerta mientras el promedio permanece en la misma banda.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub sensor_id: u16,
    pub state: TempState,
    pub average: f64,
}


/// Tabla de estadísticas por sensor, de crecimiento dinámico.
pub struct StatsTable {
    entries: Vec<SensorStats>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self { entries: Vec::with_capacity(INITIAL_STATS_CAPACITY) }
    }

    /// Incorpora una lectura y devuelve la transición de estado, si la hubo.
    pub fn apply(&mut self, sensor_id: u16, value: f64) -> Option<StateTransition> {
        let stats = self.find_or_create(sensor_id);
        stats.sum += value;
        stats.count += 1;

        let average = stats.average();
        let state = TempState::classify(average);
        if state != stats.last_state {
            stats.last_state = state;
            Some(StateTransition { sensor_id, state, average })
        } else {
            None
        }
    }

    /// Promedio móvil actual de un sensor, si ya tiene lecturas.
    pub fn average_of(&self, sensor_id: u16) -> Option<f64> {
        self.entries
            .iter()
            .find(|s| s.id == sensor_id)
            .map(SensorStats::average)
    }

    pub fn sensor_count(&self) -> usize {
        self.entries.len()
    }

    fn find_or_create(&mut self, sensor_id: u16) -> &mut SensorStats {
        if let Some(index) = self.entries.iter().position(|s| s.id == sensor_id) {
            return &mut self.entries[index];
        }
        self.entries.push(SensorStats {
            id: sensor_id,
            sum: 0.0,
            count: 0,
            last_state: TempState::Normal,
        });
        self.entries.last_mut().expect("la tabla no puede estar vacía")
    }
}

impl Default for StatsTable {
    fn default() -> Self {
        Self::new()
    }
}

//! Lógica del worker de analítica.
//!
//! Consumidor único de su buffer de staging. Por cada lectura mantiene las
//! estadísticas incrementales del sensor y emite alertas de temperatura
//! hacia el sink de logs, enriquecidas con la sala del sensor cuando el mapa
//! está disponible.
//!
//! # Flujo de trabajo
//! 1. Desencola una lectura (espera bloqueante).
//! 2. Descarta con warning las lecturas con id reservado (0).
//! 3. Actualiza suma y contador, y clasifica el promedio móvil.
//! 4. Si la clasificación cambió de banda, emite la alerta; si no, silencio
//!    (histéresis contra alertas repetidas).
//!
//! La tarea termina limpia cuando el buffer devuelve el cierre.


use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::analytics::domain::{StatsTable, StateTransition, TempState};
use crate::buffer::domain::StagingBuffer;
use crate::message::domain::INVALID_SENSOR_ID;
use crate::roommap::domain::RoomSensorMap;


/// Bucle principal del worker de analítica.
///
/// # Argumentos
/// * `buffer`: buffer de staging dedicado (extremo consumidor).
/// * `map`: mapa sala-sensor, si se pudo cargar al inicio.
pub async fn run_analytics(buffer: Arc<StagingBuffer>,
                           map: Option<RoomSensorMap>) {

    info!("Info: tarea de analítica creada");
    let mut table = StatsTable::new();

    loop {
        let reading = match buffer.remove().await {
            Ok(reading) => reading,
            Err(_) => {
                info!("Info: buffer en cierre, la analítica termina");
                break;
            }
        };

        if reading.id == INVALID_SENSOR_ID {
            warn!("Warning: se descarta una lectura con id de sensor inválido");
            continue;
        }

        if let Some(transition) = table.apply(reading.id, reading.value) {
            emit_alert(&transition, map.as_ref());
        }

        debug!(
            "Debug: sensor {} procesado, valor {:.2}, promedio {:.2}",
            reading.id,
            reading.value,
            table.average_of(reading.id).unwrap_or(0.0)
        );
    }

    info!("Info: tarea de analítica finalizada");
}


/// Publica una transición de estado en el sink de logs.
fn emit_alert(transition: &StateTransition, map: Option<&RoomSensorMap>) {
    let place = match map.and_then(|m| m.room_of(transition.sensor_id)) {
        Some(room_id) => format!("sala {}", room_id),
        None => format!("sensor {}", transition.sensor_id),
    };

    match transition.state {
        TempState::TooCold => warn!(
            "Warning: el nodo sensor {} ({}) reporta temperatura demasiado baja (promedio = {:.2})",
            transition.sensor_id, place, transition.average
        ),
        TempState::TooHot => warn!(
            "Warning: el nodo sensor {} ({}) reporta temperatura demasiado alta (promedio = {:.2})",
            transition.sensor_id, place, transition.average
        ),
        TempState::Normal => info!(
            "Info: la temperatura del nodo sensor {} ({}) volvió a la normalidad (promedio = {:.2})",
            transition.sensor_id, place, transition.average
        ),
    }
}


/// Inicializa y ejecuta el worker de analítica en segundo plano.
pub fn start_analytics(buffer: Arc<StagingBuffer>,
                       map: Option<RoomSensorMap>) -> JoinHandle<()> {

    info!("Info: iniciando tarea de analítica");
    tokio::spawn(async move {
        run_analytics(buffer, map).await;
    })
}

//! Dominio del gestor de conexiones: el registro de clientes activos.
//!
//! El `ClientRegistry` es el único estado compartido del frente de ingesta.
//! Lo mutan las tareas de cliente (admisión, actividad, baja) y lo leen las
//! operaciones del plano de control (`status`/`stats`); todos los accesos
//! toman el mismo mutex, de modo que las instantáneas son consistentes.


use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Duration;
use crate::config::network::{MAX_CONNECTIONS, MAX_CONNECTIONS_PER_IP, SENSOR_TIMEOUT};
use crate::system::domain::GatewayError;


/// Parámetros del gestor de conexiones.
///
/// Los valores por defecto salen de `config`; las pruebas inyectan tiempos
/// más cortos.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    pub idle_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_connections: MAX_CONNECTIONS,
            max_connections_per_ip: MAX_CONNECTIONS_PER_IP,
            idle_timeout: SENSOR_TIMEOUT,
        }
    }
}


/// Registro de una conexión viva.
///
/// `sensor_id` pasa a `Some` con el primer paquete del socket y nunca vuelve
/// a `None`.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub ip: String,
    pub port: u16,
    pub sensor_id: Option<u16>,
    pub last_active: i64,
    pub connected_at: i64,
}


/// Resultado de registrar actividad de un cliente.
#[derive(Debug, PartialEq, Eq)]
pub enum SensorIdUpdate {
    /// Primer paquete del socket: queda asociado a este sensor.
    First,
    /// El id coincide con el ya registrado.
    Unchanged,
    /// El socket cambió de id; se acepta la nueva identidad.
    Changed { previous: u16 },
    /// El token ya no está registrado.
    Unknown,
}


struct RegistryState {
    next_token: u64,
    clients: HashMap<u64, ClientRecord>,
}


pub struct ClientRegistry {
    max_connections: usize,
    max_connections_per_ip: usize,
    state: Mutex<RegistryState>,
}


impl ClientRegistry {
    pub fn new(max_connections: usize, max_connections_per_ip: usize) -> Self {
        Self {
            max_connections,
            max_connections_per_ip,
            state: Mutex::new(RegistryState {
                next_token: 1,
                clients: HashMap::new(),
            }),
        }
    }

    /// Admite una conexión nueva si los cupos lo permiten.
    ///
    /// Devuelve el token con el que la tarea de cliente identificará su
    /// registro, o `ResourceExhausted` si se alcanzó el cupo global o el
    /// cupo por IP.
    pub fn admit(&self, ip: &str, port: u16, now: i64) -> Result<u64, GatewayError> {
        let mut state = self.state.lock().unwrap();

        if state.clients.len() >= self.max_connections {
            return Err(GatewayError::ResourceExhausted(format!(
                "cupo global de conexiones alcanzado ({})",
                self.max_connections
            )));
        }

        let from_same_ip = state.clients.values().filter(|c| c.ip == ip).count();
        if from_same_ip >= self.max_connections_per_ip {
            return Err(GatewayError::ResourceExhausted(format!(
                "cupo de conexiones por IP alcanzado ({}) para {}",
                self.max_connections_per_ip, ip
            )));
        }

        let token = state.next_token;
        state.next_token += 1;
        state.clients.insert(token, ClientRecord {
            ip: ip.to_string(),
            port,
            sensor_id: None,
            last_active: now,
            connected_at: now,
        });
        Ok(token)
    }

    /// Registra actividad del cliente: actualiza `last_active` y la
    /// identidad del sensor.
    pub fn touch(&self, token: u64, sensor_id: u16, now: i64) -> SensorIdUpdate {
        let mut state = self.state.lock().unwrap();
        let Some(record) = state.clients.get_mut(&token) else {
            return SensorIdUpdate::Unknown;
        };

        record.last_active = now;
        match record.sensor_id {
            None => {
                record.sensor_id = Some(sensor_id);
                SensorIdUpdate::First
            }
            Some(previous) if previous != sensor_id => {
                record.sensor_id = Some(sensor_id);
                SensorIdUpdate::Changed { previous }
            }
            Some(_) => SensorIdUpdate::Unchanged,
        }
    }

    /// Da de baja una conexión. Idempotente.
    pub fn remove(&self, token: u64) -> Option<ClientRecord> {
        self.state.lock().unwrap().clients.remove(&token)
    }

    /// Cantidad de conexiones activas. Operación del plano de control.
    pub fn active_connection_count(&self) -> usize {
        self.state.lock().unwrap().clients.len()
    }

    /// Instantánea formateada de las conexiones activas, para el comando
    /// `stats` del plano de control.
    pub fn format_connection_snapshot(&self, now: i64) -> String {
        let state = self.state.lock().unwrap();
        let mut output = format!(
            "--- Conexiones activas ({}) ---\n",
            state.clients.len()
        );

        let mut records: Vec<&ClientRecord> = state.clients.values().collect();
        records.sort_by_key(|r| r.connected_at);

        for record in records {
            let elapsed = (now - record.connected_at).max(0);
            let hours = elapsed / 3600;
            let mins = (elapsed % 3600) / 60;
            let secs = elapsed % 60;
            output.push_str(&format!(
                "  Sensor ID: {:<5} | IP: {:<15} | Puerto: {:<5} | Conectado: {:02}:{:02}:{:02}\n",
                record.sensor_id.unwrap_or(0),
                record.ip,
                record.port,
                hours,
                mins,
                secs,
            ));
        }
        output
    }
}

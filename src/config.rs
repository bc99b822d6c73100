pub mod network {
    use tokio::time::Duration;

    /// Cantidad máxima de conexiones pendientes en la cola de listen.
    pub const TCP_BACKLOG: u32 = 10;
    /// Tiempo de inactividad tras el cual se desconecta un sensor.
    pub const SENSOR_TIMEOUT: Duration = Duration::from_secs(5);
    /// Conexiones simultáneas máximas que acepta el gateway.
    pub const MAX_CONNECTIONS: usize = 100;
    /// Conexiones simultáneas máximas desde una misma IP.
    pub const MAX_CONNECTIONS_PER_IP: usize = 5;
}


pub mod sbuffer {
    /// Capacidad de cada buffer de staging (elementos SensorReading).
    pub const SBUFFER_SIZE: usize = 15;
}


pub mod database {
    use tokio::time::Duration;

    /// Archivo de la base SQLite.
    pub const DB_NAME: &str = "sensordata.db";
    /// Intentos de conexión antes de declarar la base inalcanzable.
    pub const DB_CONNECT_RETRY_ATTEMPTS: u32 = 3;
    /// Espera entre intentos de conexión.
    pub const DB_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
    /// Capacidad de la cola local de reintentos del storage worker.
    pub const RETRY_QUEUE_CAPACITY: usize = 20;
    /// Conexiones del pool. SQLite serializa las escrituras, con una alcanza.
    pub const MAX_POOL_CONNECTIONS: u32 = 1;
}


pub mod analytics {
    /// Umbral de alerta por calor (promedio móvil, en °C).
    pub const TEMP_TOO_HOT_THRESHOLD: f64 = 30.0;
    /// Umbral de alerta por frío (promedio móvil, en °C).
    pub const TEMP_TOO_COLD_THRESHOLD: f64 = 15.0;
    /// Capacidad inicial de la tabla de estadísticas por sensor.
    pub const INITIAL_STATS_CAPACITY: usize = 10;
    /// Archivo de mapeo sala-sensor.
    pub const MAP_FILE_NAME: &str = "room_sensor.map";
}


pub mod control {
    /// Socket UNIX local para consultas operativas.
    pub const CMD_SOCKET_PATH: &str = "/tmp/sensor_gateway_cmd.sock";
}

//! Dominio de mensajería: el dato fundamental que atraviesa el pipeline.
//!
//! Una `SensorReading` nace en el gestor de conexiones al decodificar un
//! paquete de red, y de ahí viaja por los buffers de staging hacia la
//! analítica y la persistencia. Es inmutable una vez creada: cada consumidor
//! recibe su propia copia.


use serde::{Serialize, Deserialize};


/// Identificador de sensor reservado: nunca corresponde a un nodo válido.
pub const INVALID_SENSOR_ID: u16 = 0;

/// Tamaño exacto del paquete de red: id (u16) + valor (f64), ambos big-endian.
pub const SENSOR_PACKET_SIZE: usize = 10;


/// Una medición de temperatura de un nodo sensor.
///
/// El timestamp lo asigna el gateway al momento de leer el paquete (segundos
/// desde epoch), no el sensor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorReading {
    pub id: u16,
    pub value: f64,
    pub timestamp: i64,
}

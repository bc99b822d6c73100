//! Mapa sala-sensor: tabla estática que enriquece las alertas.
//!
//! Se carga una sola vez al arranque desde un archivo de texto y después se
//! comparte inmutable. Gramática por línea (tolerante a espacios):
//! `<sala:int> , <sensor:int>`, con `#` para comentarios y líneas en blanco
//! ignoradas. Una línea inválida se saltea con warning; si el archivo no se
//! puede abrir, el gateway continúa sin mapa y las alertas reportan el id de
//! sensor en lugar de la sala.


use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};


pub struct RoomSensorMap {
    entries: HashMap<u16, i32>,
}


impl RoomSensorMap {
    /// Parsea el contenido del archivo de mapeo.
    pub fn parse(content: &str) -> RoomSensorMap {
        let mut entries = HashMap::new();

        for (number, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut fields = trimmed.splitn(2, ',');
            let room = fields.next().map(str::trim).and_then(|f| f.parse::<i32>().ok());
            let sensor = fields.next().map(str::trim).and_then(|f| f.parse::<i64>().ok());

            match (room, sensor) {
                (Some(room_id), Some(sensor_id)) if (0..=i64::from(u16::MAX)).contains(&sensor_id) => {
                    entries.insert(sensor_id as u16, room_id);
                }
                (Some(_), Some(sensor_id)) => {
                    warn!(
                        "Warning: id de sensor {} fuera de rango en la línea {} del mapa, se saltea",
                        sensor_id,
                        number + 1
                    );
                }
                _ => {
                    warn!(
                        "Warning: formato inválido en la línea {} del mapa: '{}'",
                        number + 1,
                        trimmed
                    );
                }
            }
        }

        RoomSensorMap { entries }
    }

    /// Carga el mapa desde un archivo; `None` si no se puede leer.
    pub fn load(path: impl AsRef<Path>) -> Option<RoomSensorMap> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let map = Self::parse(&content);
                info!(
                    "Info: mapa sala-sensor '{}' cargado ({} entradas)",
                    path.display(),
                    map.len()
                );
                Some(map)
            }
            Err(e) => {
                warn!(
                    "Warning: no se pudo abrir el mapa sala-sensor '{}': {}. Se continúa sin mapa",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Sala asociada a un sensor, si está mapeado.
    pub fn room_of(&self, sensor_id: u16) -> Option<i32> {
        self.entries.get(&sensor_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsea_lineas_validas_y_tolera_espacios() {
        let map = RoomSensorMap::parse("1 , 7\n  2,9\n3 ,   11\n");

        assert_eq!(map.len(), 3);
        assert_eq!(map.room_of(7), Some(1));
        assert_eq!(map.room_of(9), Some(2));
        assert_eq!(map.room_of(11), Some(3));
    }

    #[test]
    fn ignora_comentarios_y_lineas_en_blanco() {
        let map = RoomSensorMap::parse("# encabezado\n\n   \n1,7\n  # otro comentario\n");

        assert_eq!(map.len(), 1);
        assert_eq!(map.room_of(7), Some(1));
    }

    #[test]
    fn saltea_lineas_invalidas_sin_abortar() {
        let content = "1,7\nsin coma\n2\n8,70000\nx,y\n2,9\n";
        let map = RoomSensorMap::parse(content);

        assert_eq!(map.len(), 2);
        assert_eq!(map.room_of(7), Some(1));
        assert_eq!(map.room_of(9), Some(2));
        assert_eq!(map.room_of(11), None);
    }

    #[test]
    fn un_archivo_inexistente_degrada_a_sin_mapa() {
        assert!(RoomSensorMap::load("/ruta/que/no/existe.map").is_none());
    }
}

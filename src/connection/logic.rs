//! Lógica del gestor de conexiones: el frente de ingesta TCP.
//!
//! # Arquitectura
//! Una tarea supervisora es dueña del socket de escucha y corre el bucle de
//! accept; cada cliente admitido corre en su propia tarea, registrada en un
//! `JoinSet` para poder esperarlas en el cierre. La admisión (cupo global y
//! cupo por IP) se resuelve contra el `ClientRegistry` antes de crear la
//! tarea: una conexión rechazada se cierra sin dejar registro.
//!
//! # Flujo de datos
//! 1. La tarea de cliente lee paquetes de exactamente 10 bytes.
//! 2. Cada paquete se decodifica, se sella con el reloj del gateway y se
//!    refleja en el registro (actividad e identidad del sensor).
//! 3. La lectura se duplica en ambos buffers de staging: una copia para la
//!    analítica y otra para la persistencia.
//!
//! # Terminación
//! El canal watch de cierre interrumpe tanto el accept como las lecturas de
//! los clientes. Un cliente también termina por timeout de inactividad, EOF,
//! paquete incompleto o error de socket.


use std::net::SocketAddr;
use std::sync::Arc;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use crate::buffer::domain::StagingBuffer;
use crate::config::network::TCP_BACKLOG;
use crate::connection::domain::{ClientRegistry, ConnectionSettings, SensorIdUpdate};
use crate::message::domain::{INVALID_SENSOR_ID, SENSOR_PACKET_SIZE};
use crate::message::logic::decode_packet;
use crate::system::domain::GatewayError;


/// Resultado de intentar leer un paquete completo del socket.
enum PacketRead {
    Complete([u8; SENSOR_PACKET_SIZE]),
    /// El cliente cerró la conexión en un límite de paquete.
    Eof,
    /// El cliente cerró la conexión a mitad de un paquete.
    Partial(usize),
}


/// Abre el socket de escucha con el backlog configurado.
pub fn bind_listener(port: u16) -> Result<TcpListener, GatewayError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(TCP_BACKLOG)?)
}


/// Lee del socket hasta completar un paquete de sensor.
///
/// Tolera la segmentación TCP acumulando lecturas parciales; solo un EOF a
/// mitad de paquete se reporta como `Partial`.
async fn read_packet(stream: &mut TcpStream) -> Result<PacketRead, std::io::Error> {
    let mut raw = [0u8; SENSOR_PACKET_SIZE];
    let mut filled = 0;

    while filled < SENSOR_PACKET_SIZE {
        let n = stream.read(&mut raw[filled..]).await?;
        if n == 0 {
            return Ok(if filled == 0 {
                PacketRead::Eof
            } else {
                PacketRead::Partial(filled)
            });
        }
        filled += n;
    }
    Ok(PacketRead::Complete(raw))
}


/// Bucle principal del gestor de conexiones.
///
/// # Argumentos
/// * `listener`: socket de escucha ya abierto (el orquestador falla rápido
///   si el bind no es posible).
/// * `analytics_buffer` / `storage_buffer`: destinos de cada lectura.
/// * `registry`: registro compartido de clientes activos.
/// * `settings`: cupos y timeout de inactividad.
/// * `shutdown`: canal watch de cierre.
pub async fn run_connection_manager(listener: TcpListener,
                                    analytics_buffer: Arc<StagingBuffer>,
                                    storage_buffer: Arc<StagingBuffer>,
                                    registry: Arc<ClientRegistry>,
                                    settings: ConnectionSettings,
                                    mut shutdown: watch::Receiver<bool>) {

    match listener.local_addr() {
        Ok(addr) => info!("Info: gestor de conexiones escuchando en {}", addr),
        Err(_) => info!("Info: gestor de conexiones escuchando"),
    }

    let mut clients = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Info: señal de cierre recibida, se deja de aceptar conexiones");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let ip = peer.ip().to_string();
                        match registry.admit(&ip, peer.port(), Utc::now().timestamp()) {
                            Ok(token) => {
                                info!("Info: nueva conexión aceptada desde {}", peer);
                                clients.spawn(client_task(
                                    stream,
                                    token,
                                    peer,
                                    analytics_buffer.clone(),
                                    storage_buffer.clone(),
                                    registry.clone(),
                                    settings.clone(),
                                    shutdown.clone(),
                                ));
                            }
                            Err(e) => {
                                // El socket se cierra al soltarse sin registrar.
                                warn!("Warning: conexión rechazada desde {}: {}", peer, e);
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error: fallo el accept: {}", e);
                    }
                }
            }
        }
    }

    // Cerrar el listener antes de esperar a los clientes: no entran datos
    // nuevos mientras se drena.
    drop(listener);
    info!("Info: cerrando las conexiones de clientes restantes");
    while clients.join_next().await.is_some() {}
    info!("Info: gestor de conexiones finalizado");
}


/// Atiende un cliente admitido hasta su desconexión.
async fn client_task(mut stream: TcpStream,
                     token: u64,
                     peer: SocketAddr,
                     analytics_buffer: Arc<StagingBuffer>,
                     storage_buffer: Arc<StagingBuffer>,
                     registry: Arc<ClientRegistry>,
                     settings: ConnectionSettings,
                     mut shutdown: watch::Receiver<bool>) {

    loop {
        let read_result = tokio::select! {
            _ = shutdown.changed() => {
                info!("Info: cerrando la conexión de {} por cierre del gateway", peer);
                break;
            }
            result = timeout(settings.idle_timeout, read_packet(&mut stream)) => result,
        };

        let packet = match read_result {
            Err(_elapsed) => {
                info!("Info: el sensor en {} superó el tiempo de inactividad, se desconecta", peer);
                break;
            }
            Ok(Err(e)) => {
                error!("Error: fallo la lectura del socket de {}: {}", peer, e);
                break;
            }
            Ok(Ok(PacketRead::Eof)) => {
                info!("Info: el nodo sensor en {} cerró la conexión", peer);
                break;
            }
            Ok(Ok(PacketRead::Partial(bytes))) => {
                let violation = GatewayError::ProtocolViolation(format!(
                    "paquete incompleto ({} de {} bytes)",
                    bytes, SENSOR_PACKET_SIZE
                ));
                warn!("Warning: {} desde {}, se cierra la conexión", violation, peer);
                break;
            }
            Ok(Ok(PacketRead::Complete(raw))) => raw,
        };

        let reading = decode_packet(&packet, Utc::now().timestamp());

        if reading.id == INVALID_SENSOR_ID {
            warn!("Warning: se recibió una lectura con id de sensor inválido desde {}", peer);
        }

        match registry.touch(token, reading.id, reading.timestamp) {
            SensorIdUpdate::First => {
                info!("Info: el nodo sensor {} abrió una conexión desde {}", reading.id, peer);
            }
            SensorIdUpdate::Changed { previous } => {
                warn!(
                    "Warning: el socket de {} cambió de sensor {} a {}",
                    peer, previous, reading.id
                );
            }
            SensorIdUpdate::Unchanged => {}
            SensorIdUpdate::Unknown => {
                error!("Error: actividad de un cliente sin registro ({})", peer);
                break;
            }
        }

        if analytics_buffer.insert(reading.clone()).await.is_err() {
            info!("Info: buffer de analítica en cierre, se desconecta {}", peer);
            break;
        }
        if storage_buffer.insert(reading.clone()).await.is_err() {
            info!("Info: buffer de persistencia en cierre, se desconecta {}", peer);
            break;
        }
        debug!("Debug: lectura del sensor {} encolada en ambos buffers", reading.id);
    }

    registry.remove(token);
}


/// Inicializa y ejecuta el gestor de conexiones en segundo plano.
pub fn start_connection_manager(listener: TcpListener,
                                analytics_buffer: Arc<StagingBuffer>,
                                storage_buffer: Arc<StagingBuffer>,
                                registry: Arc<ClientRegistry>,
                                settings: ConnectionSettings,
                                shutdown: watch::Receiver<bool>) -> JoinHandle<()> {

    info!("Info: iniciando tarea del gestor de conexiones");
    tokio::spawn(async move {
        run_connection_manager(
            listener,
            analytics_buffer,
            storage_buffer,
            registry,
            settings,
            shutdown,
        ).await;
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tokio::io::AsyncWriteExt;
    use tokio::time::{sleep, Duration};
    use crate::analytics::logic::start_analytics;
    use crate::channels::domain::Channels;
    use crate::message::logic::encode_packet;
    use crate::storage::domain::StorageSettings;
    use crate::storage::logic::start_storage;

    struct Harness {
        addr: SocketAddr,
        channels: Channels,
        registry: Arc<ClientRegistry>,
        conmgt: JoinHandle<()>,
        workers: Vec<JoinHandle<()>>,
    }

    async fn spawn_gateway(settings: ConnectionSettings) -> Harness {
        let channels = Channels::new();
        let registry = Arc::new(ClientRegistry::new(
            settings.max_connections,
            settings.max_connections_per_ip,
        ));
        let listener = bind_listener(0).unwrap();
        let addr = listener.local_addr().unwrap();
        let conmgt = start_connection_manager(
            listener,
            channels.analytics_buffer.clone(),
            channels.storage_buffer.clone(),
            registry.clone(),
            settings,
            channels.shutdown_rx(),
        );
        Harness { addr, channels, registry, conmgt, workers: Vec::new() }
    }

    async fn shutdown_gateway(harness: Harness) {
        let _ = harness.channels.shutdown_tx.send(true);
        harness.channels.analytics_buffer.signal_shutdown();
        harness.channels.storage_buffer.signal_shutdown();
        for worker in harness.workers {
            worker.await.unwrap();
        }
        harness.conmgt.await.unwrap();
    }

    fn temp_db_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "gateway_conmgt_{}_{}.db",
            tag,
            std::process::id()
        ))
    }

    async fn fetch_rows(db_path: &PathBuf) -> Vec<(i64, i64, f64)> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(db_path))
            .await
            .unwrap();
        let rows = sqlx::query_as::<_, (i64, i64, f64)>(
            "SELECT SensorID, Timestamp, Value FROM SensorData ORDER BY RecordID",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        pool.close().await;
        rows
    }

    #[tokio::test]
    async fn una_lectura_atraviesa_el_pipeline_hasta_la_base() {
        let db_path = temp_db_path("pipeline");
        let _ = std::fs::remove_file(&db_path);

        let mut harness = spawn_gateway(ConnectionSettings::default()).await;
        harness.workers.push(start_analytics(
            harness.channels.analytics_buffer.clone(),
            None,
        ));
        harness.workers.push(start_storage(
            harness.channels.storage_buffer.clone(),
            harness.channels.fatal_tx.clone(),
            harness.channels.shutdown_rx(),
            StorageSettings {
                db_path: db_path.clone(),
                ..StorageSettings::default()
            },
        ));

        let before = Utc::now().timestamp();
        let mut stream = TcpStream::connect(harness.addr).await.unwrap();
        stream.write_all(&encode_packet(7, 20.0)).await.unwrap();
        sleep(Duration::from_millis(400)).await;

        assert_eq!(harness.registry.active_connection_count(), 1);

        shutdown_gateway(harness).await;

        let rows = fetch_rows(&db_path).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 7);
        assert!(rows[0].1 >= before && rows[0].1 <= Utc::now().timestamp());
        assert_eq!(rows[0].2, 20.0);
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn la_sexta_conexion_de_una_ip_es_rechazada() {
        let harness = spawn_gateway(ConnectionSettings::default()).await;

        let mut streams = Vec::new();
        for _ in 0..6 {
            streams.push(TcpStream::connect(harness.addr).await.unwrap());
        }
        sleep(Duration::from_millis(300)).await;

        assert_eq!(harness.registry.active_connection_count(), 5);

        // Exactamente una de las seis conexiones fue cerrada por el gateway.
        let mut probes = Vec::new();
        for mut stream in streams {
            probes.push(tokio::spawn(async move {
                let mut byte = [0u8; 1];
                matches!(
                    timeout(Duration::from_millis(500), stream.read(&mut byte)).await,
                    Ok(Ok(0))
                )
            }));
        }
        let mut closed = 0;
        for probe in probes {
            if probe.await.unwrap() {
                closed += 1;
            }
        }
        assert_eq!(closed, 1);

        shutdown_gateway(harness).await;
    }

    #[tokio::test]
    async fn un_cliente_inactivo_se_desconecta_por_timeout() {
        let settings = ConnectionSettings {
            idle_timeout: Duration::from_millis(300),
            ..ConnectionSettings::default()
        };
        let harness = spawn_gateway(settings).await;

        let mut stream = TcpStream::connect(harness.addr).await.unwrap();
        stream.write_all(&encode_packet(7, 20.0)).await.unwrap();
        sleep(Duration::from_millis(150)).await;
        assert_eq!(harness.registry.active_connection_count(), 1);

        // Sin tráfico nuevo el gateway corta la conexión.
        sleep(Duration::from_millis(700)).await;
        assert_eq!(harness.registry.active_connection_count(), 0);

        shutdown_gateway(harness).await;
    }

    #[tokio::test]
    async fn un_paquete_incompleto_corta_la_conexion() {
        let harness = spawn_gateway(ConnectionSettings::default()).await;

        let mut stream = TcpStream::connect(harness.addr).await.unwrap();
        stream.write_all(&encode_packet(7, 20.0)[..4]).await.unwrap();
        sleep(Duration::from_millis(150)).await;
        assert_eq!(harness.registry.active_connection_count(), 1);

        // El cierre del cliente deja el paquete por la mitad.
        drop(stream);
        sleep(Duration::from_millis(300)).await;
        assert_eq!(harness.registry.active_connection_count(), 0);

        shutdown_gateway(harness).await;
    }

    #[tokio::test]
    async fn el_cierre_drena_las_lecturas_en_vuelo() {
        let db_path = temp_db_path("drain");
        let _ = std::fs::remove_file(&db_path);

        let mut harness = spawn_gateway(ConnectionSettings::default()).await;
        harness.workers.push(start_analytics(
            harness.channels.analytics_buffer.clone(),
            None,
        ));
        harness.workers.push(start_storage(
            harness.channels.storage_buffer.clone(),
            harness.channels.fatal_tx.clone(),
            harness.channels.shutdown_rx(),
            StorageSettings {
                db_path: db_path.clone(),
                ..StorageSettings::default()
            },
        ));

        let mut stream = TcpStream::connect(harness.addr).await.unwrap();
        for i in 0..10u16 {
            stream
                .write_all(&encode_packet(7, 18.0 + f64::from(i) * 0.1))
                .await
                .unwrap();
        }
        sleep(Duration::from_millis(400)).await;

        shutdown_gateway(harness).await;

        let rows = fetch_rows(&db_path).await;
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|row| row.0 == 7));
        let _ = std::fs::remove_file(&db_path);
    }
}

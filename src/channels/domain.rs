//! Registro central de canales y buffers del pipeline (Wiring Harness).
//!
//! Este módulo actúa como el "sistema nervioso" de la aplicación: crea en un
//! solo lugar los dos buffers de staging y los canales de control que
//! interconectan las tareas. La estructura `Channels` se construye al inicio
//! (`main.rs`) y se reparte entregando a cada tarea solo los extremos que
//! necesita.
//!
//! # Arquitectura
//! * **Buffers de staging (15):** el flujo de datos principal. Son dos
//!   instancias independientes porque cada lectura debe llegar tanto a la
//!   analítica como a la persistencia; el gestor de conexiones duplica cada
//!   lectura en ambos.
//! * **Canal watch de cierre:** señal de terminación observada por el gestor
//!   de conexiones, sus clientes, la interfaz de comandos y los sleeps de
//!   reconexión del storage worker.
//! * **Canal fatal (1):** evento de escalamiento del storage worker hacia el
//!   orquestador cuando la base queda inalcanzable. Es poco frecuente y
//!   crítico, no requiere cola.


use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use crate::buffer::domain::StagingBuffer;
use crate::config::sbuffer::SBUFFER_SIZE;
use crate::system::domain::InternalEvent;


/// Contenedor de los buffers y canales de control del sistema.
pub struct Channels {
    pub analytics_buffer: Arc<StagingBuffer>,
    pub storage_buffer: Arc<StagingBuffer>,
    pub shutdown_tx: watch::Sender<bool>,
    pub fatal_tx: mpsc::Sender<InternalEvent>,
    pub fatal_rx: mpsc::Receiver<InternalEvent>,
}


impl Channels {

    pub fn new() -> Channels {
        info!("Info: creando buffers de staging y canales de control");
        let (shutdown_tx, _) = watch::channel(false);
        let (fatal_tx, fatal_rx) = mpsc::channel::<InternalEvent>(1);

        Self {
            analytics_buffer: Arc::new(StagingBuffer::new(SBUFFER_SIZE)),
            storage_buffer: Arc::new(StagingBuffer::new(SBUFFER_SIZE)),
            shutdown_tx,
            fatal_tx,
            fatal_rx,
        }
    }

    /// Devuelve un nuevo observador del canal de cierre.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

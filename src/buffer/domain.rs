//! Buffer de staging acotado entre el frente de ingesta y un consumidor.
//!
//! Implementa una FIFO circular con exactamente un consumidor por instancia
//! (el pipeline crea dos instancias: una alimenta a la analítica y otra a la
//! persistencia, de modo que cada lectura llega a ambos consumidores
//! exactamente una vez). Del lado productor insertan las tareas de cliente
//! del gestor de conexiones.
//!
//! # Sincronización
//! El estado (anillo, índices, contador y flag de cierre) vive bajo un único
//! `Mutex` que nunca se retiene a través de un `await`. Las esperas por
//! "hay lugar" y "hay datos" usan un par de `Notify`; cada espera se
//! registra con `enable` antes de chequear la condición, así un
//! `notify_waiters` emitido entre el chequeo y el `await` no se pierde. Los
//! chequeos son bucles, por lo que los despertares espurios son inocuos.
//!
//! # Protocolo de cierre
//! `signal_shutdown` marca el flag y despierta a todos los que esperan.
//! Después del cierre `insert` falla de inmediato, mientras que `remove`
//! sigue drenando los elementos pendientes y recién entonces devuelve
//! `BufferShutdown`.


use std::sync::Mutex;
use tokio::sync::Notify;
use crate::message::domain::SensorReading;
use crate::system::domain::GatewayError;


struct BufferState {
    slots: Vec<Option<SensorReading>>,
    head: usize,
    tail: usize,
    count: usize,
    shutdown: bool,
}


pub struct StagingBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
    not_full: Notify,
    not_empty: Notify,
}


impl StagingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(BufferState {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                count: 0,
                shutdown: false,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
        }
    }

    /// Encola una lectura (lado productor).
    ///
    /// Espera mientras el buffer esté lleno. Si el cierre ya fue señalado
    /// devuelve `BufferShutdown` sin encolar.
    pub async fn insert(&self, reading: SensorReading) -> Result<(), GatewayError> {
        let mut pending = Some(reading);
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if state.shutdown {
                    return Err(GatewayError::BufferShutdown);
                }
                if state.count < self.capacity {
                    let head = state.head;
                    state.slots[head] = pending.take();
                    state.head = (state.head + 1) % self.capacity;
                    state.count += 1;
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Desencola la lectura más antigua (lado consumidor).
    ///
    /// Espera mientras el buffer esté vacío. Tras el cierre drena lo
    /// pendiente y devuelve `BufferShutdown` recién con el buffer vacío.
    pub async fn remove(&self) -> Result<SensorReading, GatewayError> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if state.count > 0 {
                    let tail = state.tail;
                    let reading = state.slots[tail]
                        .take()
                        .expect("slot ocupado sin dato");
                    state.tail = (state.tail + 1) % self.capacity;
                    state.count -= 1;
                    drop(state);
                    self.not_full.notify_one();
                    return Ok(reading);
                }
                if state.shutdown {
                    return Err(GatewayError::BufferShutdown);
                }
            }
            notified.await;
        }
    }

    /// Señala el cierre y despierta a todos los que estén esperando.
    /// Idempotente.
    pub fn signal_shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.shutdown = true;
        }
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }

    /// Cantidad de lecturas encoladas en este momento.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};
    use crate::system::domain::GatewayError;

    fn reading(id: u16, value: f64) -> SensorReading {
        SensorReading { id, value, timestamp: 0 }
    }

    #[tokio::test]
    async fn mantiene_orden_fifo_con_mas_elementos_que_capacidad() {
        let buffer = Arc::new(StagingBuffer::new(4));
        let total = 50u16;

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                for i in 1..=total {
                    buffer.insert(reading(i, f64::from(i))).await.unwrap();
                }
            })
        };

        let mut received = Vec::new();
        for _ in 0..total {
            received.push(buffer.remove().await.unwrap().id);
        }
        producer.await.unwrap();

        let expected: Vec<u16> = (1..=total).collect();
        assert_eq!(received, expected);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn insert_bloquea_con_buffer_lleno_hasta_que_hay_lugar() {
        let buffer = Arc::new(StagingBuffer::new(2));
        buffer.insert(reading(1, 1.0)).await.unwrap();
        buffer.insert(reading(2, 2.0)).await.unwrap();

        let blocked = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.insert(reading(3, 3.0)).await })
        };

        // Sin lugar, el productor no debe completar.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(buffer.remove().await.unwrap().id, 1);
        timeout(Duration::from_secs(1), blocked)
            .await
            .expect("el insert no se destrabó")
            .unwrap()
            .unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test]
    async fn tras_el_cierre_se_drena_lo_pendiente_antes_de_shutdown() {
        let buffer = StagingBuffer::new(8);
        buffer.insert(reading(1, 1.0)).await.unwrap();
        buffer.insert(reading(2, 2.0)).await.unwrap();
        buffer.insert(reading(3, 3.0)).await.unwrap();

        buffer.signal_shutdown();

        assert!(matches!(
            buffer.insert(reading(4, 4.0)).await,
            Err(GatewayError::BufferShutdown)
        ));
        assert_eq!(buffer.remove().await.unwrap().id, 1);
        assert_eq!(buffer.remove().await.unwrap().id, 2);
        assert_eq!(buffer.remove().await.unwrap().id, 3);
        assert!(matches!(
            buffer.remove().await,
            Err(GatewayError::BufferShutdown)
        ));
    }

    #[tokio::test]
    async fn el_cierre_despierta_a_un_consumidor_bloqueado() {
        let buffer = Arc::new(StagingBuffer::new(4));

        let consumer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.remove().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        buffer.signal_shutdown();

        let result = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("el remove no se destrabó")
            .unwrap();
        assert!(matches!(result, Err(GatewayError::BufferShutdown)));
    }

    #[tokio::test]
    async fn el_cierre_despierta_a_un_productor_bloqueado() {
        let buffer = Arc::new(StagingBuffer::new(1));
        buffer.insert(reading(1, 1.0)).await.unwrap();

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.insert(reading(2, 2.0)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        buffer.signal_shutdown();

        let result = timeout(Duration::from_secs(1), producer)
            .await
            .expect("el insert no se destrabó")
            .unwrap();
        assert!(matches!(result, Err(GatewayError::BufferShutdown)));
        // El elemento ya encolado sigue disponible para drenar.
        assert_eq!(buffer.remove().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn signal_shutdown_es_idempotente() {
        let buffer = StagingBuffer::new(2);
        buffer.signal_shutdown();
        buffer.signal_shutdown();

        assert!(matches!(
            buffer.remove().await,
            Err(GatewayError::BufferShutdown)
        ));
    }
}

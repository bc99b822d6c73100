use std::path::Path;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Executor;
use tracing::info;
use crate::config::database::MAX_POOL_CONNECTIONS;
use crate::message::domain::SensorReading;
use crate::system::domain::GatewayError;


#[derive(Clone, Debug)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Abre (o crea) la base y garantiza el esquema.
    pub async fn connect(db_path: &Path) -> Result<Self, GatewayError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(GatewayError::DbConnect)?;

        init_schema(&pool).await.map_err(GatewayError::DbConnect)?;
        info!("Info: conexión establecida con la base '{}'", db_path.display());
        Ok(Self { pool })
    }

    /// Inserta una lectura con una sentencia parametrizada.
    pub async fn insert_reading(&self, reading: &SensorReading) -> Result<(), GatewayError> {
        sqlx::query("INSERT INTO SensorData (SensorID, Timestamp, Value) VALUES (?, ?, ?)")
            .bind(i64::from(reading.id))
            .bind(reading.timestamp)
            .bind(reading.value)
            .execute(&self.pool)
            .await
            .map_err(GatewayError::DbInsert)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Info: conexión con la base cerrada");
    }
}


async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS SensorData (
            RecordID   INTEGER PRIMARY KEY AUTOINCREMENT,
            SensorID   INTEGER NOT NULL,
            Timestamp  INTEGER NOT NULL,
            Value      REAL NOT NULL
        );
        "#,
    )
    .await?;

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "gateway_repo_{}_{}.db",
            tag,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn conecta_crea_el_esquema_e_inserta() {
        let db_path = temp_db_path("insert");
        let _ = std::fs::remove_file(&db_path);

        let repo = Repository::connect(&db_path).await.unwrap();
        let reading = SensorReading { id: 42, value: 21.5, timestamp: 1_700_000_000 };
        repo.insert_reading(&reading).await.unwrap();

        let row: (i64, i64, f64) = sqlx::query_as(
            "SELECT SensorID, Timestamp, Value FROM SensorData",
        )
        .fetch_one(&repo.pool)
        .await
        .unwrap();

        assert_eq!(row, (42, 1_700_000_000, 21.5));
        repo.close().await;
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn reconectar_no_pierde_el_esquema_ni_los_datos() {
        let db_path = temp_db_path("reconnect");
        let _ = std::fs::remove_file(&db_path);

        let repo = Repository::connect(&db_path).await.unwrap();
        repo.insert_reading(&SensorReading { id: 1, value: 10.0, timestamp: 5 })
            .await
            .unwrap();
        repo.close().await;

        let repo = Repository::connect(&db_path).await.unwrap();
        repo.insert_reading(&SensorReading { id: 2, value: 11.0, timestamp: 6 })
            .await
            .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM SensorData")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 2);
        repo.close().await;
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn una_ruta_imposible_devuelve_error_de_conexion() {
        let result = Repository::connect(Path::new("/ruta/inexistente/gateway.db")).await;
        assert!(matches!(result, Err(GatewayError::DbConnect(_))));
    }
}

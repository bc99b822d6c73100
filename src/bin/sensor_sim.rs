//! Simulador de nodo sensor para pruebas de carga del gateway.
//!
//! Se conecta por TCP y envía un paquete de 10 bytes por intervalo: id del
//! sensor (`u16` big-endian) seguido de la temperatura (`f64` IEEE-754
//! big-endian), el mismo orden de bytes que decodifica el gateway. La
//! temperatura fluctúa al azar alrededor de una base fija.
//!
//! Uso: `sensor_sim <host> <puerto> <id> <intervalo_ms>`

use std::process::ExitCode;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};
use sensor_gateway_service::message::logic::encode_packet;


/// Temperatura base de la simulación, en °C.
const BASE_TEMP: f64 = 22.0;
/// Fluctuación máxima alrededor de la base, en °C.
const TEMP_FLUCTUATION: f64 = 5.0;
/// Intervalo mínimo entre paquetes, en milisegundos.
const MIN_INTERVAL_MS: u64 = 10;


struct SimArgs {
    host: String,
    port: u16,
    sensor_id: u16,
    interval: Duration,
}


#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let sim = match parse_args(&args) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(args.first().map(String::as_str).unwrap_or("sensor_sim"));
            return ExitCode::FAILURE;
        }
    };

    println!(
        "INFO: simulador del sensor {} enviando a {}:{} cada {} ms",
        sim.sensor_id,
        sim.host,
        sim.port,
        sim.interval.as_millis()
    );

    let mut stream = match TcpStream::connect((sim.host.as_str(), sim.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Error: no se pudo conectar con {}:{}: {}", sim.host, sim.port, e);
            return ExitCode::FAILURE;
        }
    };
    println!("INFO: conectado con el gateway");

    loop {
        let value = generate_temperature();
        let packet = encode_packet(sim.sensor_id, value);

        if let Err(e) = stream.write_all(&packet).await {
            eprintln!("Error: fallo el envío, el gateway cerró la conexión: {}", e);
            return ExitCode::FAILURE;
        }
        println!("INFO: sensor {} envió {:.2} °C", sim.sensor_id, value);

        sleep(sim.interval).await;
    }
}


fn generate_temperature() -> f64 {
    let mut rng = rand::thread_rng();
    BASE_TEMP + rng.gen_range(-TEMP_FLUCTUATION..=TEMP_FLUCTUATION)
}


fn parse_args(args: &[String]) -> Result<SimArgs, String> {
    if args.len() != 5 {
        return Err("se esperan exactamente cuatro argumentos".to_string());
    }

    let host = args[1].clone();
    let port = match args[2].parse::<u16>() {
        Ok(0) | Err(_) => {
            return Err(format!("puerto inválido '{}', debe estar entre 1 y 65535", args[2]))
        }
        Ok(port) => port,
    };
    let sensor_id = match args[3].parse::<u16>() {
        Ok(0) | Err(_) => {
            return Err(format!("id de sensor inválido '{}', debe estar entre 1 y 65535", args[3]))
        }
        Ok(id) => id,
    };
    let interval_ms = args[4]
        .parse::<u64>()
        .map_err(|_| format!("intervalo inválido '{}'", args[4]))?;
    if interval_ms < MIN_INTERVAL_MS {
        return Err(format!(
            "intervalo inválido '{}', el mínimo es {} ms",
            args[4], MIN_INTERVAL_MS
        ));
    }

    Ok(SimArgs {
        host,
        port,
        sensor_id,
        interval: Duration::from_millis(interval_ms),
    })
}


fn print_usage(prog_name: &str) {
    eprintln!("Uso: {} <host> <puerto> <id> <intervalo_ms>", prog_name);
    eprintln!("  <host>: dirección o nombre del gateway");
    eprintln!("  <puerto>: puerto TCP del gateway (1-65535)");
    eprintln!("  <id>: id del sensor simulado (1-65535)");
    eprintln!("  <intervalo_ms>: milisegundos entre paquetes (mínimo 10)");
}

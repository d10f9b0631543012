use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};

use client::darray::DArray;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para mandarle jobs al maestro")]
pub struct Cli {
    /// Endpoint TCP de jobs del maestro
    #[arg(long, default_value = "127.0.0.1:8001")]
    maestro: SocketAddr,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía un rango de enteros como job con la operación indicada
    Submit {
        #[arg(value_name = "OPERACION")]
        operation: String,

        #[arg(long, default_value_t = 1)]
        from: i64,

        #[arg(long, default_value_t = 10_000)]
        to: i64,
    },
    /// Corre los dos ejemplos clásicos del clúster
    Demo,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            operation,
            from,
            to,
        } => {
            let arr = DArray::from_ints(cli.maestro, (from..=to).collect());
            ejecutar("Submit", &arr, &operation).await?;
        }
        Commands::Demo => {
            // Ejemplo 1: procesamiento matemático sobre 10000 doubles
            let arr = DArray::from_ints(cli.maestro, (1..=10_000).collect());
            ejecutar("Ejemplo 1: Procesamiento Matemático", &arr, "COMPLEX_OP").await?;

            // Ejemplo 2: evaluación condicional sobre enteros
            let arr = DArray::from_ints(cli.maestro, (1..=2000).collect());
            ejecutar(
                "Ejemplo 2: Evaluación Condicional",
                &arr,
                "CONDITIONAL_OP_INT",
            )
            .await?;
        }
    }

    Ok(())
}

async fn ejecutar(nombre: &str, arr: &DArray, operation: &str) -> Result<()> {
    println!("--- {} ---", nombre);
    println!("entrada: {}", arr);

    let started = Instant::now();
    let resultado = arr.map(operation).await?;

    println!("resultado: {}", resultado);
    println!("tiempo: {} ms", started.elapsed().as_millis());
    Ok(())
}

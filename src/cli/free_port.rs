use crate::services::find_free_port;
use anyhow::Result;
use clap::Args;

#[derive(Args, Debug)]
pub struct FreePortOptions {
    /// Início do intervalo (inclusivo)
    #[arg(long, default_value_t = 9092)]
    pub min: u16,
    /// Fim do intervalo (inclusivo)
    #[arg(long, default_value_t = 9592)]
    pub max: u16,
}

pub fn run(options: FreePortOptions) -> Result<()> {
    let port = find_free_port(options.min..=options.max)?;
    println!("{port}");
    Ok(())
}

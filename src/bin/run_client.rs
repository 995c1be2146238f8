use clap::Parser;

use genomic_intake::client::Client;
use genomic_intake::config::ClientConfig;
use genomic_intake::reply::Reply;
use genomic_intake::{tls, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = ClientConfig::parse();

    let tls_config = tls::load_client_config(&config.ca)?;
    let addr = format!("{}:{}", config.host, config.port);

    let mut client = Client::connect(addr, config.server_name(), tls_config).await?;

    let response = client.send(&config.message).await?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&Reply::parse(&response))?);
    } else {
        println!("{response}");
    }

    if response != "BYE" {
        client.exit().await?;
    }

    Ok(())
}

use std::{path::PathBuf, process};

use structopt::StructOpt;
use tokio::{signal, sync::mpsc};
use tracing_subscriber::*;

use mc2_federation::{
    federation::{Coordinator, FederationBinding, Incomplete, Party, QuorumState},
    identity::Pki,
    launcher::{DmlcSubmitter, HostFile, Launcher, SshShell},
    settings::{FederationSettings, LauncherSettings, PkiSettings, Settings},
    storage::{redis::Client, DirectoryService},
};

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "mc2")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Publishes the address and the public key of a user
    Upload {
        username: String,
        ip_address: String,
        /// Path of the public key file
        #[structopt(parse(from_os_str))]
        key_file: PathBuf,
    },
    /// Prints the address and the public key of a user
    Lookup { username: String },
    /// Authorizes the public key of a user to log into this host
    SaveKey { username: String },
    /// Declares the members of the federation of a master
    Create { master: String, members: Vec<String> },
    /// Confirms the membership of a member in the federation of a master
    Join { member: String, master: String },
    /// Checks whether every member joined the federation of a master
    Check {
        master: String,
        /// Waits until every member joined
        #[structopt(long)]
        wait: bool,
    },
    /// Relaunches the training job of a complete federation
    Launch { master: String, party_count: u32 },
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        directory: directory_settings,
        log: log_settings,
        pki: pki_settings,
        launcher: launcher_settings,
        federation: federation_settings,
    } = settings;

    FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    let mut client = Client::new(directory_settings.url)
        .await
        .unwrap_or_else(|err| {
            eprintln!("failed to connect to the directory service: {}", err);
            process::exit(1);
        });
    if let Err(err) = client.is_ready().await {
        eprintln!("directory service is not ready: {}", err);
        process::exit(1);
    }

    let result = match opt.command {
        Command::Upload {
            username,
            ip_address,
            key_file,
        } => upload(client, pki_settings, username, ip_address, key_file).await,
        Command::Lookup { username } => lookup(client, pki_settings, username).await,
        Command::SaveKey { username } => {
            let mut pki = Pki::new(client, pki_settings.authorized_keys());
            pki.save_key(&username).await.map_err(Into::into)
        }
        Command::Create { master, members } => {
            let mut coordinator = Coordinator::new(Party::master(master), client);
            coordinator
                .create_federation(members)
                .await
                .map(|binding| println!("created the federation of {}", binding))
                .map_err(Into::into)
        }
        Command::Join { member, master } => {
            let mut coordinator = Coordinator::new(Party::worker(member), client);
            coordinator
                .join_federation(&master)
                .await
                .map(|binding| println!("joined the federation of {}", binding))
                .map_err(Into::into)
        }
        Command::Check { master, wait } => check(client, federation_settings, master, wait).await,
        Command::Launch {
            master,
            party_count,
        } => launch(client, launcher_settings, master, party_count).await,
    };

    if let Err(err) = result {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}

async fn upload(
    client: Client,
    pki_settings: PkiSettings,
    username: String,
    ip_address: String,
    key_file: PathBuf,
) -> anyhow::Result<()> {
    let public_key = tokio::fs::read_to_string(&key_file)
        .await
        .map_err(|err| anyhow::anyhow!("failed to read {}: {}", key_file.display(), err))?;
    let mut pki = Pki::new(client, pki_settings.authorized_keys());
    pki.upload(&username, &ip_address, &public_key).await?;
    Ok(())
}

async fn lookup(client: Client, pki_settings: PkiSettings, username: String) -> anyhow::Result<()> {
    let mut pki = Pki::new(client, pki_settings.authorized_keys());
    let record = pki.lookup(&username).await?;
    println!("{} {}", record.ip_address, record.public_key);
    Ok(())
}

async fn check(
    client: Client,
    federation_settings: FederationSettings,
    master: String,
    wait: bool,
) -> anyhow::Result<()> {
    let binding = FederationBinding::new(master.clone());
    let mut coordinator = Coordinator::new(Party::master(master), client);

    if wait {
        let members = coordinator
            .wait_for_quorum(
                &binding,
                federation_settings.poll_interval(),
                federation_settings.poll_timeout(),
            )
            .await?;
        println!("federation of {} is complete: {}", binding, members.join(", "));
        return Ok(());
    }

    match coordinator.check_federation(Some(&binding)).await? {
        QuorumState::Complete { members } => {
            println!("federation of {} is complete: {}", binding, members.join(", "))
        }
        QuorumState::Incomplete(Incomplete::MembersPending(pending)) => println!(
            "federation of {} is incomplete, waiting for: {}",
            binding,
            pending.join(", ")
        ),
        QuorumState::Incomplete(Incomplete::FederationMissing) => {
            println!("federation of {} does not exist", binding)
        }
        QuorumState::NoFederation => println!("no federation configured"),
    }
    Ok(())
}

async fn launch(
    client: Client,
    launcher_settings: LauncherSettings,
    master: String,
    party_count: u32,
) -> anyhow::Result<()> {
    let binding = FederationBinding::new(master.clone());
    let members = Coordinator::new(Party::master(master), client)
        .require_quorum(&binding)
        .await?;
    if members.len() != party_count as usize {
        warn!(
            "launching {} workers for a federation of {} members",
            party_count,
            members.len()
        );
    }

    let hosts = HostFile::load(&launcher_settings.host_file).await?;
    let launcher = Launcher::new(
        SshShell::from(&launcher_settings.ssh),
        DmlcSubmitter::new(launcher_settings.submit_program.clone()),
        launcher_settings,
    );

    let (output_tx, mut output_rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(line) = output_rx.recv().await {
            println!("{}", line);
        }
    });
    let cancel = async {
        if signal::ctrl_c().await.is_err() {
            // without a signal handler the launch can't be interrupted
            futures::future::pending::<()>().await;
        }
    };

    let report = launcher.launch(&hosts, party_count, output_tx, cancel).await;
    let _ = printer.await;
    let report = report?;

    for (host, err) in report.skipped() {
        warn!(host = %host, "stale processes may still run: {}", err);
    }
    Ok(())
}

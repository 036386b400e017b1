use clap::Parser;
use std::time::Duration;
use tiny_torrent::error::{Error, Result};
use tiny_torrent::peer::session::PeerSession;
use tiny_torrent::storage::Storage;
use tiny_torrent::torrent::Torrent;
use tiny_torrent::tracker::{self, AnnounceParams, Event};
use tiny_torrent::utils::generate_peer_id;

#[derive(Parser, Debug)]
#[command(about = "A minimal BitTorrent client")]
struct Cli {
    #[arg(short, long, help = "path to a *.torrent file")]
    file: String,
    #[arg(short, long, help = "path to write the downloaded content")]
    out: String,
    #[arg(short, long, default_value_t = 6881, help = "local listen/announce port")]
    port: u16,
}

fn main() {
    env_logger::init();
    let args = Cli::parse();

    if let Err(err) = run(args) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(args: Cli) -> Result<()> {
    let peer_id = generate_peer_id();
    let torrent = Torrent::from_file(&args.file)?;
    log::info!("loaded {} ({} pieces)", torrent.name, torrent.piece_count());

    let params = AnnounceParams {
        peer_id,
        port: args.port,
        uploaded: 0,
        downloaded: 0,
        left: torrent.total_length() as u64,
        event: Event::Started,
    };
    let announce = tracker::announce(&torrent, &params)?;
    log::info!("tracker returned {} peers", announce.peers.len());

    let addr = *announce
        .peers
        .first()
        .ok_or_else(|| Error::PeerUnreachable("tracker returned no peers".into()))?;

    let mut storage = Storage::new(&torrent, &args.out)?;
    let mut session = PeerSession::connect(addr, &torrent, peer_id, Duration::from_secs(5))?;
    log::info!("handshook with {addr}");

    session.run(&torrent, &mut storage, None, Duration::from_secs(30))?;
    log::info!(
        "session ended with {} of {} pieces verified",
        session.completed_pieces().len(),
        torrent.piece_count()
    );

    Ok(())
}

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use shared::{ClientPacket, MatchStatus, MatchType, ServerPacket};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Queues for a quick match and plays it by always taking the first free cell
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Account id; omit to play as a guest
    #[arg(short = 'u', long)]
    user_id: Option<String>,

    /// Name shown to the opponent
    #[arg(short = 'n', long)]
    display_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let args = Args::parse();

    let url = format!("ws://{}", args.server);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    info!("Connected to {}", url);
    let (mut write, mut read) = ws_stream.split();

    let join = ClientPacket::JoinMatchmaking {
        match_type: MatchType::Quick,
        user_id: args.user_id,
        display_name: args.display_name,
        rating: None,
    };
    write
        .send(Message::Text(serde_json::to_string(&join)?))
        .await?;

    let mut me = String::new();
    let mut game_id = String::new();

    while let Some(frame) = read.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let packet: ServerPacket = match serde_json::from_str(&text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Unreadable frame {}: {}", text, e);
                continue;
            }
        };
        println!("<- {}", text);

        let reply = match packet {
            ServerPacket::MatchmakingJoined { player_id, .. } => {
                me = player_id;
                None
            }
            ServerPacket::MatchFound { session_id, .. } => {
                game_id = session_id;
                Some(ClientPacket::JoinGame {
                    game_id: game_id.clone(),
                    player_id: me.clone(),
                })
            }
            ServerPacket::GameUpdate {
                current_turn,
                board,
                players,
            } if current_turn == me && players.len() == 2 => first_free(&board)
                .map(|position| ClientPacket::MakeMove {
                    game_id: game_id.clone(),
                    player_id: me.clone(),
                    position,
                }),
            ServerPacket::MoveMade {
                current_turn,
                board,
                ..
            } if current_turn == me => first_free(&board).map(|position| ClientPacket::MakeMove {
                game_id: game_id.clone(),
                player_id: me.clone(),
                position,
            }),
            ServerPacket::GameEnd { winner, .. } => {
                match winner {
                    Some(winner) if winner == me => println!("Won"),
                    Some(winner) => println!("Lost to {}", winner),
                    None => println!("Draw"),
                }
                break;
            }
            ServerPacket::MatchmakingStatus { status, .. } if ends_search(status) => {
                println!("Matchmaking ended with {:?}, giving up", status);
                break;
            }
            ServerPacket::MatchmakingStatus { status, .. } => {
                info!("Matchmaking status: {:?}", status);
                None
            }
            _ => None,
        };

        if let Some(reply) = reply {
            write
                .send(Message::Text(serde_json::to_string(&reply)?))
                .await?;
        }
    }

    let _ = write.close().await;
    Ok(())
}

fn first_free(board: &shared::Board) -> Option<usize> {
    board.iter().position(Option::is_none)
}

/// No MATCH_FOUND follows these
fn ends_search(status: MatchStatus) -> bool {
    matches!(status, MatchStatus::Timeout | MatchStatus::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ends_search() {
        assert!(ends_search(MatchStatus::Timeout));
        assert!(ends_search(MatchStatus::Error));
        assert!(!ends_search(MatchStatus::Searching));
        assert!(!ends_search(MatchStatus::Found));
    }

    #[test]
    fn test_first_free() {
        let mut board = shared::empty_board();
        assert_eq!(first_free(&board), Some(0));
        board[0] = Some(shared::Mark::X);
        assert_eq!(first_free(&board), Some(1));
        board = [Some(shared::Mark::O); shared::BOARD_SIZE];
        assert_eq!(first_free(&board), None);
    }
}

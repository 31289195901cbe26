//! The master role: server directory, handover verification, and a toy
//! character store.
//!
//! Handover verification asks the login registry directly, so this role
//! has to live in the same process as the login role.

use std::sync::Arc;

use cinder::prelude::*;
use cinder::rpc::ServerDirectory;
use cinder::rpc::calls::{
    CharacterSummary, LoadCharacterData, LoadCharacterDataResponse, LoadCharacters,
    LoadCharactersResponse, VerifySession, VerifySessionResponse,
};

/// Character ids encode their owner: `account << 3 | slot`.
pub fn owner_of(character_id: i32) -> AccountId {
    AccountId(character_id >> 3)
}

fn roster(account: AccountId) -> Vec<CharacterSummary> {
    (0..2)
        .map(|slot| CharacterSummary {
            id: (account.0 << 3) | slot,
            name: format!("wanderer{}-{slot}", account.0),
            level: 1 + slot as u16 * 9,
            appearance: vec![slot as u8; 4],
        })
        .collect()
}

/// Builds the master role's RPC server, bound but not yet running.
pub async fn build(
    addr: &str,
    login: Arc<ConnectionRegistry>,
) -> Result<(RpcServer, Arc<ServerDirectory>), CinderError> {
    let mut server = RpcServer::bind(addr, RpcConfig::default()).await?;

    let directory = Arc::new(ServerDirectory::new());
    directory.install(&mut server)?;

    server.register::<VerifySession, _, _>(move |peer, req| {
        let login = Arc::clone(&login);
        async move {
            let account = login.lookup(req.user_index).await.and_then(|session| {
                let genuine = session.auth_key() == req.auth_key && session.ip() == req.ip;
                genuine.then(|| session.account()).flatten()
            });
            tracing::info!(
                peer = %peer.id,
                index = %req.user_index,
                server_id = req.server_id,
                channel_id = req.channel_id,
                verified = account.is_some(),
                "handover checked"
            );
            Ok(VerifySessionResponse {
                verified: account.is_some(),
                account,
            })
        }
    })?;

    server.register::<LoadCharacters, _, _>(|_, req| async move {
        Ok(LoadCharactersResponse {
            characters: roster(req.account),
        })
    })?;

    server.register::<LoadCharacterData, _, _>(|_, req| async move {
        if req.character_id < 0 {
            return Err(CallError::new(format!("no character {}", req.character_id)));
        }
        Ok(LoadCharacterDataResponse {
            equipment: vec![0; 8],
            inventory: vec![0; 16],
            skills: vec![1, 2, 3],
            quick_slots: vec![0; 4],
        })
    })?;

    Ok((server, directory))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_ids_belong_to_account() {
        let characters = roster(AccountId(12));
        assert_eq!(characters.len(), 2);
        assert!(characters.iter().all(|c| owner_of(c.id) == AccountId(12)));
    }

    #[test]
    fn test_owner_of_foreign_character_differs() {
        assert_ne!(owner_of((13 << 3) | 1), AccountId(12));
    }
}

use astra_types::{PeerId, TrustedPeer};
use rusqlite::{params, Connection};

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS peers (id TEXT PRIMARY KEY, data TEXT NOT NULL);
         CREATE TABLE IF NOT EXISTS blocklist (id TEXT PRIMARY KEY);",
    )
}

pub fn load_peers(conn: &Connection) -> anyhow::Result<Vec<TrustedPeer>> {
    let mut stmt = conn.prepare("SELECT data FROM peers")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut peers = Vec::new();
    for row in rows {
        let data = row?;
        peers.push(serde_json::from_str(&data)?);
    }
    Ok(peers)
}

pub fn load_blocklist(conn: &Connection) -> rusqlite::Result<Vec<PeerId>> {
    let mut stmt = conn.prepare("SELECT id FROM blocklist")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.map(|r| r.map(PeerId)).collect()
}

pub fn save_peer(conn: &Connection, peer: &TrustedPeer) -> anyhow::Result<()> {
    let data = serde_json::to_string(peer)?;
    conn.execute(
        "INSERT INTO peers (id, data) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        params![peer.id.0, data],
    )?;
    Ok(())
}

pub fn delete_peer(conn: &Connection, id: &PeerId) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM peers WHERE id = ?1", params![id.0])?;
    Ok(())
}

pub fn add_block(conn: &Connection, id: &PeerId) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO blocklist (id) VALUES (?1)",
        params![id.0],
    )?;
    Ok(())
}

pub fn remove_block(conn: &Connection, id: &PeerId) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM blocklist WHERE id = ?1", params![id.0])?;
    Ok(())
}

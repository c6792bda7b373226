//! Example: basic spawn, component add/remove, and query dispatch.

use archetype_core::World;

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
}

fn main() -> archetype_core::Result<()> {
    let mut world = World::new();

    let player = world.add_entity((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 0.5 }))?;
    world.add_entity((Position { x: 10.0, y: 10.0 },))?;

    world.for_each::<(Position, Velocity)>(|(pos, vel)| {
        pos.x += vel.x;
        pos.y += vel.y;
    });

    println!("player moved to {:?}", world.get::<Position>(player.id)?);

    world.remove_entity(player.id)?;
    println!("entities remaining: {}", world.entity_count());

    Ok(())
}

// Runs a short training burst on each architecture and compares how
// the composite loss decomposes across its terms.

use sculpt::{ Geometry, Tensor, TermWeights, Trainer, TrainingSession };

fn main() {
  let geometry = Geometry::new(8, 8);

  for tag in ["compression", "transformation", "expansion"] {
    let session = TrainingSession::<f32>::seeded(geometry, tag, 0.01, 7)
      .expect("session setup");
    let mut trainer = Trainer::new(session, ());

    let weights = TermWeights::for_tag(tag).expect("known tag");
    println!("\n=== {tag} ===");
    println!("layer widths: {:?}", trainer.session().student().layers().iter()
      .map(|layer| layer.size() )
      .collect::<Vec<_>>());
    println!("term weights: {weights:?}");

    let first = trainer.step().expect("first step");
    for _ in 0..99 {
      trainer.step().expect("training step");
    }
    let last = trainer.step().expect("final step");

    println!("baseline loss: {:.5} -> {:.5}", first.baseline_loss, last.baseline_loss);
    println!("student loss:  {:.5} -> {:.5}", first.student_loss, last.student_loss);

    let pixels: Tensor<f32> = trainer.session().input().clone();
    println!("target mean brightness: {:.3}", pixels.mean());
  }
}

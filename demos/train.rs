// Trains the baseline and the student side by side on a seeded random
// target image, printing both losses as the auto-run advances.

use sculpt::{ Geometry, Presenter, Tensor, Trainer, TrainingSession };

struct Console;

impl Presenter<f32> for Console {
  fn present(&mut self, step: usize, frame: &Tensor<f32>) {
    if step % 50 == 0 {
      println!("--- frame after step {step} ---\n{frame}");
    }
  }
}

fn main() {
  let session = TrainingSession::<f32>::seeded(Geometry::new(8, 8), "compression", 0.01, 42)
    .expect("session setup");
  let mut trainer = Trainer::new(session, Console);

  trainer.start_auto();
  while trainer.session().step() < 200 {
    match trainer.tick() {
      Some(Ok(report)) => {
        if report.step % 10 == 0 {
          println!("step {:>4}  baseline {:.5}  student {:.5}",
            report.step, report.baseline_loss, report.student_loss);
        }
      },
      Some(Err(err)) => {
        eprintln!("training aborted: {err}");
        break
      },
      None => break,
    }
  }
}
